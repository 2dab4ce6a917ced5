//! Sense CLI - Command-line interface for Synheart Sense
//!
//! Commands:
//! - simulate-health: Run a health scenario through baselines and inference
//! - simulate-steps: Stream simulated IMU data through the activity path
//! - simulate-ppg: Stream simulated PPG data through the vitals path
//! - config: Print or validate a processor configuration
//! - doctor: Diagnose configuration and run a processing self-test

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use synheart_sense::config::SenseConfig;
use synheart_sense::pipeline::SenseProcessor;
use synheart_sense::sensor::{ManualClock, SensorManager};
use synheart_sense::signal::{ImuSensorModel, PpgSensorModel};
use synheart_sense::simulator::{
    GaitPattern, HealthScenario, HealthSimulator, ImuSimulator, PpgSimulator, SimulatedSource,
};
use synheart_sense::types::{AcquisitionBatch, HealthStatus, SleepRecord, VitalsRecord};
use synheart_sense::{ComputeError, PRODUCER_NAME, SENSE_VERSION};

const DAY_MS: i64 = 86_400_000;

/// Sense - On-device sensor-to-health inference
#[derive(Parser)]
#[command(name = "sense")]
#[command(author = "Synheart AI Inc")]
#[command(version = SENSE_VERSION)]
#[command(about = "Run PPG, IMU and health inference on simulated wearable data", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed healthy days followed by a scenario into the health monitor
    SimulateHealth {
        /// Scenario after the healthy run (healthy, getting-sick, sick, recovering, overtrained)
        #[arg(long, default_value = "sick")]
        scenario: String,

        /// Healthy days used to build baselines
        #[arg(long, default_value = "7")]
        healthy_days: u32,

        /// Days of the scenario
        #[arg(long, default_value = "3")]
        scenario_days: u32,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Processor configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Stream simulated accelerometer data and count steps
    SimulateSteps {
        /// Gait pattern (rest, walk, run)
        #[arg(long, default_value = "walk")]
        pattern: String,

        /// Seconds to simulate
        #[arg(long, default_value = "10")]
        seconds: u32,

        /// IMU sample rate (Hz)
        #[arg(long, default_value = "50")]
        sample_rate: f64,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Processor configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Stream simulated PPG data and estimate heart rate
    SimulatePpg {
        /// Simulated heart rate (bpm)
        #[arg(long, default_value = "72")]
        heart_rate: f64,

        /// Seconds to simulate
        #[arg(long, default_value = "60")]
        seconds: u32,

        /// Seconds of signal per processing window
        #[arg(long, default_value = "30")]
        window: u32,

        /// Sensor noise (0-1)
        #[arg(long, default_value = "0")]
        noise: f64,

        /// Motion artifact level (0-1)
        #[arg(long, default_value = "0")]
        motion: f64,

        /// Simulate a sleeping wearer
        #[arg(long)]
        sleep: bool,

        /// RNG seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Processor configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Print the effective configuration, optionally validating a file
    Config {
        /// Configuration file to validate (defaults are printed when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,
    },

    /// Diagnose configuration and run a processing self-test
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), SenseCliError> {
    match cli.command {
        Commands::SimulateHealth {
            scenario,
            healthy_days,
            scenario_days,
            seed,
            config,
            output_format,
        } => {
            let scenario: HealthScenario = scenario.parse()?;
            let config = load_config(config.as_deref())?;
            let records = cmd_simulate_health(config, scenario, healthy_days, scenario_days, seed)?;
            print!("{}", format_output(&records, &output_format)?);
        }
        Commands::SimulateSteps {
            pattern,
            seconds,
            sample_rate,
            seed,
            config,
            output_format,
        } => {
            let pattern: GaitPattern = pattern.parse()?;
            let config = load_config(config.as_deref())?;
            let records = cmd_simulate_steps(config, pattern, seconds, sample_rate, seed)?;
            print!("{}", format_output(&records, &output_format)?);
        }
        Commands::SimulatePpg {
            heart_rate,
            seconds,
            window,
            noise,
            motion,
            sleep,
            seed,
            config,
            output_format,
        } => {
            let config = load_config(config.as_deref())?;
            let options = PpgRun {
                heart_rate,
                seconds,
                window: window.max(1),
                noise,
                motion,
                sleep,
                seed,
            };
            let records = cmd_simulate_ppg(config, &options)?;
            print!("{}", format_output(&records, &output_format)?);
        }
        Commands::Config { input } => {
            let config = load_config(input.as_deref())?;
            println!("{}", config.to_json()?);
        }
        Commands::Doctor { config, json } => {
            cmd_doctor(config.as_deref(), json)?;
        }
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SenseConfig, SenseCliError> {
    match path {
        Some(path) => Ok(SenseConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(SenseConfig::default()),
    }
}

// ============================================================================
// simulate-health
// ============================================================================

#[derive(Serialize)]
struct HealthDay {
    day: u32,
    scenario: HealthScenario,
    timestamp: String,
    vitals: VitalsRecord,
    sleep: SleepRecord,
    status: HealthStatus,
}

fn cmd_simulate_health(
    config: SenseConfig,
    scenario: HealthScenario,
    healthy_days: u32,
    scenario_days: u32,
    seed: u64,
) -> Result<Vec<HealthDay>, SenseCliError> {
    let mut processor = SenseProcessor::new(config)?;
    let mut sim = HealthSimulator::new(seed);
    let start = chrono::Utc::now()
        .date_naive()
        .and_hms_opt(7, 0, 0)
        .map(|t| t.and_utc().timestamp_millis())
        .unwrap_or(0);

    let plan = (0..healthy_days)
        .map(|d| (HealthScenario::Healthy, d))
        .chain((0..scenario_days).map(|d| (scenario, d)));

    let mut records = Vec::new();
    for (index, (phase, phase_day)) in plan.enumerate() {
        let ts = start + index as i64 * DAY_MS;
        let vitals = sim.vitals(phase, phase_day, ts);
        let sleep = sim.sleep(phase, phase_day, ts - 9 * 3_600_000);
        processor.update_vitals(&vitals);
        let status = processor.update_sleep(&sleep)?;
        records.push(HealthDay {
            day: index as u32,
            scenario: phase,
            timestamp: chrono::DateTime::from_timestamp_millis(ts)
                .map(|t| t.to_rfc3339())
                .unwrap_or_default(),
            vitals,
            sleep,
            status,
        });
    }
    Ok(records)
}

// ============================================================================
// simulate-steps / simulate-ppg
// ============================================================================

#[derive(Serialize)]
struct StepSecond {
    second: u32,
    samples: usize,
    activity: String,
    step_count: u64,
    cadence_spm: f64,
    magnitude: f64,
}

type SimManager = SensorManager<
    SimulatedSource<PpgSimulator, ManualClock>,
    SimulatedSource<ImuSimulator, ManualClock>,
    ManualClock,
>;

fn simulated_manager(
    config: &SenseConfig,
    ppg: PpgSimulator,
    imu: ImuSimulator,
    clock: &ManualClock,
) -> SimManager {
    SensorManager::new(
        SimulatedSource::new(ppg, clock.clone()),
        SimulatedSource::new(imu, clock.clone()),
        clock.clone(),
        config.sensors.clone(),
    )
}

/// Drain every pending sample from both sources
fn drain(manager: &mut SimManager) -> Result<AcquisitionBatch, ComputeError> {
    let mut all = AcquisitionBatch::default();
    loop {
        let batch = manager.read_batch()?;
        if batch.is_empty() {
            return Ok(all);
        }
        all.ppg.extend(batch.ppg);
        all.imu.extend(batch.imu);
    }
}

fn cmd_simulate_steps(
    mut config: SenseConfig,
    pattern: GaitPattern,
    seconds: u32,
    sample_rate: f64,
    seed: u64,
) -> Result<Vec<StepSecond>, SenseCliError> {
    if sample_rate <= 0.0 {
        return Err(SenseCliError::Usage("sample rate must be positive".to_string()));
    }
    config.imu_sample_rate_hz = sample_rate;
    let mut processor = SenseProcessor::new(config.clone())?;

    let clock = ManualClock::new(0);
    let imu = ImuSimulator::new(seed, sample_rate, pattern);
    let ppg = PpgSimulator::new(seed, config.ppg_sensor, 70.0);
    let mut manager = simulated_manager(&config, ppg, imu, &clock);
    manager.start_session()?;

    let mut records = Vec::new();
    for second in 1..=seconds {
        clock.advance(1_000);
        let mut batch = drain(&mut manager)?;
        batch.ppg.clear();
        let result = processor.process_batch(&batch)?;
        let info = result.activity.unwrap_or_else(|| processor.get_activity_info());
        records.push(StepSecond {
            second,
            samples: batch.imu.len(),
            activity: info.activity.as_str().to_string(),
            step_count: info.step_count,
            cadence_spm: info.cadence_spm,
            magnitude: info.magnitude,
        });
    }
    manager.stop_session()?;
    Ok(records)
}

struct PpgRun {
    heart_rate: f64,
    seconds: u32,
    window: u32,
    noise: f64,
    motion: f64,
    sleep: bool,
    seed: u64,
}

#[derive(Serialize)]
struct PpgWindow {
    end_second: u32,
    samples: usize,
    heart_rate_bpm: f64,
    confidence: f64,
    rr_count: usize,
    rmssd_ms: Option<f64>,
    quality: f64,
}

fn cmd_simulate_ppg(config: SenseConfig, run: &PpgRun) -> Result<Vec<PpgWindow>, SenseCliError> {
    let mut processor = SenseProcessor::new(config.clone())?;

    let clock = ManualClock::new(0);
    let mut ppg = PpgSimulator::new(run.seed, config.ppg_sensor, run.heart_rate);
    ppg.set_noise_level(run.noise);
    ppg.set_motion_level(run.motion);
    ppg.set_sleep_mode(run.sleep);
    let imu = ImuSimulator::new(run.seed, config.imu_sample_rate_hz, GaitPattern::Rest);
    let mut manager = simulated_manager(&config, ppg, imu, &clock);
    manager.start_session()?;

    let mut records = Vec::new();
    let mut elapsed = 0;
    while elapsed < run.seconds {
        let step = run.window.min(run.seconds - elapsed);
        clock.advance(step as u64 * 1_000);
        elapsed += step;
        let batch = drain(&mut manager)?;
        let hr = processor.process_ppg_samples(&batch.ppg);
        let rmssd_ms = match processor.get_hrv() {
            Ok(hrv) => Some(hrv.rmssd_ms),
            Err(e) if e.is_transient() => None,
            Err(e) => return Err(e.into()),
        };
        records.push(PpgWindow {
            end_second: elapsed,
            samples: batch.ppg.len(),
            heart_rate_bpm: hr.heart_rate_bpm,
            confidence: hr.confidence,
            rr_count: hr.count,
            rmssd_ms,
            quality: processor.snapshot().ppg_quality,
        });
    }
    manager.stop_session()?;
    Ok(records)
}

// ============================================================================
// doctor
// ============================================================================

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), SenseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "sense_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Sense version {}", SENSE_VERSION),
    });

    let config = match config_path {
        Some(path) if !path.exists() => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Config file {} does not exist", path.display()),
            });
            None
        }
        Some(path) => match load_config(Some(path)) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config file {} is valid", path.display()),
                });
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: CliError::from(e).message,
                });
                None
            }
        },
        None => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: "Using default configuration".to_string(),
            });
            Some(SenseConfig::default())
        }
    };

    for model in [PpgSensorModel::Max30101, PpgSensorModel::Max86141] {
        checks.push(preset_check(model.name(), model.pipeline().map(|p| p.len())));
    }
    for model in [ImuSensorModel::Bma400, ImuSensorModel::Bmi270] {
        checks.push(preset_check(model.name(), model.pipeline().map(|p| p.len())));
    }

    if let Some(config) = config {
        let check = match cmd_simulate_steps(config, GaitPattern::Walk, 10, 50.0, 1) {
            Ok(records) => {
                let steps = records.last().map(|r| r.step_count).unwrap_or(0);
                DoctorCheck {
                    name: "self_test".to_string(),
                    status: if steps > 0 { CheckStatus::Ok } else { CheckStatus::Warning },
                    message: format!("10 s simulated walk counted {} steps", steps),
                }
            }
            Err(e) => DoctorCheck {
                name: "self_test".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            },
        };
        checks.push(check);
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        "stdout is a TTY (interactive mode)"
    } else {
        "stdout is a pipe (NDJSON output ready)"
    };
    checks.push(DoctorCheck {
        name: "stdout".to_string(),
        status: CheckStatus::Ok,
        message: stdout_check.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SENSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Sense Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(SenseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn preset_check(name: &str, stages: Result<usize, ComputeError>) -> DoctorCheck {
    match stages {
        Ok(n) => DoctorCheck {
            name: format!("preset_{}", name.to_ascii_lowercase()),
            status: CheckStatus::Ok,
            message: format!("{} preset builds ({} stages)", name, n),
        },
        Err(e) => DoctorCheck {
            name: format!("preset_{}", name.to_ascii_lowercase()),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

// Helper functions

fn format_output<T: Serialize>(records: &[T], format: &OutputFormat) -> Result<String, SenseCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            Ok(lines.join("\n") + "\n")
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum SenseCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    Usage(String),
    DoctorFailed,
}

impl From<io::Error> for SenseCliError {
    fn from(e: io::Error) -> Self {
        SenseCliError::Io(e)
    }
}

impl From<ComputeError> for SenseCliError {
    fn from(e: ComputeError) -> Self {
        SenseCliError::Compute(e)
    }
}

impl From<serde_json::Error> for SenseCliError {
    fn from(e: serde_json::Error) -> Self {
        SenseCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SenseCliError> for CliError {
    fn from(e: SenseCliError) -> Self {
        match e {
            SenseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SenseCliError::Compute(ComputeError::ConfigurationError(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'sense config' to see a valid configuration".to_string()),
            },
            SenseCliError::Compute(e) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            SenseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SenseCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'sense --help'".to_string()),
            },
            SenseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
