//! Gridbot - JSON Scenario Runner
//!
//! Drives the kernel on the mock HAL through scenario files and prints one
//! JSON result per scenario. Frames go through the same dispatcher and
//! request desk as on the robot; heartbeats come from the periodic timer
//! table.
//!
//! ```text
//! scenario_runner gridbot/scenarios/*.json --pretty
//! ```

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use gridbot::hal::mock::MockHal;
use gridbot::prelude::*;
use gridbot::{heartbeat_event, StatusReport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "scenario_runner")]
#[command(about = "Run gridbot kernel scenarios on the mock HAL")]
#[command(version)]
struct Cli {
    /// Scenario files
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Pretty-print the JSON results
    #[arg(long)]
    pretty: bool,
}

/// Errors from scenario execution
#[derive(Error, Debug)]
enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown state: {0}")]
    UnknownState(String),

    #[error("Kernel error: {0}")]
    Kernel(gridbot::Error),

    #[error("Step {step}: {message}")]
    Expectation { step: usize, message: String },
}

type Result<T> = std::result::Result<T, RunnerError>;

// ============================================================================
// Scenario Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct Scenario {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    config: Option<ConquestConfig>,
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    /// Run heartbeats
    Ticks { count: u32 },
    /// Run heartbeats until the navigation state matches
    Until { nav: String, max_ticks: u32 },
    /// Raw ground readings
    SetLine { raw: [u16; 3] },
    /// Raw proximity readings
    SetProximity { raw: [u16; 8] },
    /// Place the robot on a node of the grid model (`null` to leave it)
    GridNode { mask: Option<u8> },
    /// Deliver a request frame
    Send { request: Request },
    ExpectNav { state: String },
    ExpectRequest { state: String },
    /// Next reply must match
    ExpectReply(ReplyCheck),
    ExpectNoReply,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Request {
    Reset,
    Status,
    Turn { quarters: i8 },
    Move {
        #[serde(default)]
        back: bool,
    },
    SetSpeed { units: u8 },
    SetLed { mask: u16 },
}

#[derive(Debug, Deserialize)]
struct ReplyCheck {
    kind: String,
    /// Sensor mask of Abyss/Collision replies
    #[serde(default)]
    mask: Option<u8>,
    /// Direction mask of HitNode and Status replies
    #[serde(default)]
    node_mask: Option<u8>,
    /// Speed of Status replies
    #[serde(default)]
    speed: Option<u16>,
    /// Navigation state of Status replies
    #[serde(default)]
    nav: Option<String>,
    /// Initialization error flag of Status replies
    #[serde(default)]
    error: Option<bool>,
    /// Refused code of Rejected replies
    #[serde(default)]
    code: Option<u16>,
}

#[derive(Debug, Serialize)]
struct ScenarioResult {
    name: String,
    passed: bool,
    steps: usize,
    ticks: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    replies: Vec<String>,
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let results: Vec<ScenarioResult> = cli.scenarios.iter().map(|p| run_file(p)).collect();

    let output = if cli.pretty {
        serde_json::to_string_pretty(&results)
    } else {
        serde_json::to_string(&results)
    };
    match output {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to encode results: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();
    eprintln!("\n=== Scenario Summary ===");
    eprintln!("Passed: {}/{}", passed, total);

    if passed == total {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run_file(path: &Path) -> ScenarioResult {
    let fallback_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    let scenario = match load(path) {
        Ok(s) => s,
        Err(e) => {
            warn!("cannot load {}: {}", path.display(), e);
            return ScenarioResult {
                name: fallback_name,
                passed: false,
                steps: 0,
                ticks: 0,
                error: Some(e.to_string()),
                replies: Vec::new(),
            };
        }
    };

    info!("running {} ({})", scenario.name, scenario.description);
    let desk = RequestDesk::new();
    let hal = MockHal::new();
    let mut rig = Rig::new(&desk, &hal, scenario.config);
    let outcome = rig.play(&scenario.steps);

    ScenarioResult {
        name: scenario.name,
        passed: outcome.is_ok(),
        steps: rig.steps,
        ticks: rig.conquest.ticks(),
        error: outcome.err().map(|e| e.to_string()),
        replies: rig.seen,
    }
}

fn load(path: &Path) -> Result<Scenario> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

// ============================================================================
// Rig
// ============================================================================

struct Rig<'a> {
    hal: &'a MockHal,
    desk: &'a RequestDesk,
    conquest: Conquest<'a, MockHal>,
    timer: PeriodicTimer<Conquest<'a, MockHal>>,
    dispatcher: Dispatcher<RequestDesk>,
    period: TimeUs,
    pending: VecDeque<Message>,
    seen: Vec<String>,
    steps: usize,
}

impl<'a> Rig<'a> {
    fn new(desk: &'a RequestDesk, hal: &'a MockHal, config: Option<ConquestConfig>) -> Self {
        let conquest = Conquest::new(desk, hal, config);
        let period = conquest.config().heartbeat_period;
        Self {
            hal,
            desk,
            conquest,
            timer: PeriodicTimer::new(),
            dispatcher: Dispatcher::new(),
            period,
            pending: VecDeque::new(),
            seen: Vec::new(),
            steps: 0,
        }
    }

    fn play(&mut self, steps: &[Step]) -> Result<()> {
        desk::install(&mut self.dispatcher).map_err(RunnerError::Kernel)?;
        self.timer
            .register_periodic_event(heartbeat_event, self.period, true, self.hal.time_us())
            .map_err(RunnerError::Kernel)?;

        for (index, step) in steps.iter().enumerate() {
            debug!("step {}: {:?}", index, step);
            self.steps = index + 1;
            self.apply(index, step)?;
        }
        Ok(())
    }

    fn tick(&mut self) {
        self.hal.advance_time(self.period);
        self.timer.poll(&mut self.conquest, self.hal.time_us());
        self.collect();
    }

    fn collect(&mut self) {
        for msg in self.hal.take_sent() {
            self.seen.push(describe(&msg));
            self.pending.push_back(msg);
        }
    }

    fn apply(&mut self, step: usize, op: &Step) -> Result<()> {
        let fail = |message: String| RunnerError::Expectation { step, message };

        match op {
            Step::Ticks { count } => {
                for _ in 0..*count {
                    self.tick();
                }
            }
            Step::Until { nav, max_ticks } => {
                let target = parse_nav(nav)?;
                let mut ticks = 0;
                while self.conquest.navigation_state() != target {
                    if ticks == *max_ticks {
                        return Err(fail(format!(
                            "{:?} not reached in {} ticks (stuck in {:?})",
                            target,
                            max_ticks,
                            self.conquest.navigation_state()
                        )));
                    }
                    self.tick();
                    ticks += 1;
                }
            }
            Step::SetLine { raw } => self.hal.set_line(*raw),
            Step::SetProximity { raw } => self.hal.set_proximity(*raw),
            Step::GridNode { mask } => self.hal.set_grid_node(*mask),
            Step::Send { request } => {
                let msg = build_request(request);
                self.dispatcher.dispatch(self.desk, &msg, self.hal);
                self.collect();
            }
            Step::ExpectNav { state } => {
                let expected = parse_nav(state)?;
                let actual = self.conquest.navigation_state();
                if actual != expected {
                    return Err(fail(format!("navigation {:?}, expected {:?}", actual, expected)));
                }
            }
            Step::ExpectRequest { state } => {
                let actual = format!("{:?}", self.desk.request_state());
                if !actual.eq_ignore_ascii_case(state) {
                    return Err(fail(format!("request {}, expected {}", actual, state)));
                }
            }
            Step::ExpectReply(check) => {
                let msg = self
                    .pending
                    .pop_front()
                    .ok_or_else(|| fail(format!("no reply, expected {}", check.kind)))?;
                verify_reply(&msg, check).map_err(fail)?;
            }
            Step::ExpectNoReply => {
                if let Some(msg) = self.pending.front() {
                    return Err(fail(format!("unexpected reply {}", describe(msg))));
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_nav(name: &str) -> Result<NavigationState> {
    NavigationState::ALL
        .iter()
        .copied()
        .find(|s| format!("{:?}", s).eq_ignore_ascii_case(name))
        .ok_or_else(|| RunnerError::UnknownState(name.to_string()))
}

fn build_request(request: &Request) -> Message {
    match request {
        Request::Reset => Message::reset_request(),
        Request::Status => Message::status_request(),
        Request::Turn { quarters } => Message::turn_request(*quarters),
        Request::Move { back: false } => Message::move_request(MoveKind::Forward),
        Request::Move { back: true } => Message::move_request(MoveKind::Return),
        Request::SetSpeed { units } => Message::set_speed_request(*units),
        Request::SetLed { mask } => Message::set_led_request(*mask),
    }
}

fn describe(msg: &Message) -> String {
    match msg.kind() {
        Some(kind) => format!("{:?}", kind),
        None => format!("0x{:04X}", msg.code),
    }
}

fn verify_reply(msg: &Message, check: &ReplyCheck) -> std::result::Result<(), String> {
    let kind = describe(msg);
    if !kind.eq_ignore_ascii_case(&check.kind) {
        return Err(format!("reply {}, expected {}", kind, check.kind));
    }

    if let Some(mask) = check.mask {
        if msg.sensor_mask() != mask {
            return Err(format!("sensor mask {:#04x}, expected {:#04x}", msg.sensor_mask(), mask));
        }
    }
    if let Some(code) = check.code {
        if msg.rejected_code() != code {
            return Err(format!("rejected code {:#06x}, expected {:#06x}", msg.rejected_code(), code));
        }
    }

    if msg.is(MsgType::HitNode) {
        if let Some(node_mask) = check.node_mask {
            if msg.node().mask() != node_mask {
                return Err(format!("node {:#04x}, expected {:#04x}", msg.node().mask(), node_mask));
            }
        }
    }

    if msg.is(MsgType::Status) {
        let report = StatusReport::decode(msg).map_err(|e| e.to_string())?;
        if let Some(node_mask) = check.node_mask {
            if report.node_mask != node_mask {
                return Err(format!("status node {:#04x}, expected {:#04x}", report.node_mask, node_mask));
            }
        }
        if let Some(speed) = check.speed {
            if report.speed != speed {
                return Err(format!("status speed {}, expected {}", report.speed, speed));
            }
        }
        if let Some(error) = check.error {
            if report.error != error {
                return Err(format!("status error flag {}, expected {}", report.error, error));
            }
        }
        if let Some(nav) = &check.nav {
            let expected = parse_nav(nav).map_err(|e| e.to_string())?;
            if report.navigation != expected {
                return Err(format!("status navigation {:?}, expected {:?}", report.navigation, expected));
            }
        }
    }
    Ok(())
}
