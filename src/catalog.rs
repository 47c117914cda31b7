//! Register tables for the EasyServo drive.
//!
//! The built-in tables were recorded from the vendor tuning software's traffic.
//! Defaults and ranges are metadata for front ends; the driver only sends the
//! request bytes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::command::{BatchStep, Command};
use crate::errors::{DriverError, Result};

pub const REG_CURRENT_LOOP_KP: u16 = 0x00;
pub const REG_PULSES_PER_REVOLUTION: u16 = 0x0E;
pub const REG_ALARMS: u16 = 0x10;
pub const REG_POSITION_ERROR_LIMIT: u16 = 0x12;
/// Write 1 to begin a capture; read 200 words to fetch it.
pub const REG_SCOPE_TRIGGER: u16 = 0x14;
pub const REG_SCOPE_ENABLE_A: u16 = 0x41;
pub const REG_SCOPE_ENABLE_B: u16 = 0x42;
/// Capture duration in 10 ms ticks.
pub const REG_SCOPE_DURATION: u16 = 0xD0;
/// Last byte reads 0x02 once a capture is complete.
pub const REG_SCOPE_STATUS: u16 = 0xDA;
pub const REG_INTRODUCTION: u16 = 0xFD;

/// Words in one scope capture, whatever the duration.
pub const SCOPE_SAMPLES: u16 = 200;

/// Number of registers returned by the alarm summary read.
pub const ALARM_WORDS: u16 = 10;

pub const PULSES_PER_REVOLUTION: &str = "pulses / revolution";
pub const POSITION_ERROR_LIMIT: &str = "position error limit (pulses)";

/// Drive parameters read by the vendor software's parameter, motor and I/O screens.
pub fn parameters() -> Vec<Command> {
    let table: [(&str, u16, (u16, u16), u16); 22] = [
        ("current loop kp", 641, (0, 32766), REG_CURRENT_LOOP_KP),
        ("current loop ki", 291, (0, 32766), 0x01),
        (PULSES_PER_REVOLUTION, 4000, (200, 51200), REG_PULSES_PER_REVOLUTION),
        ("encoder resolution (ppr)", 4000, (200, 51200), 0x0F),
        (POSITION_ERROR_LIMIT, 1000, (0, 65535), REG_POSITION_ERROR_LIMIT),
        ("position loop kp", 2000, (0, 32767), 0x06),
        ("position loop ki", 500, (0, 32767), 0x07),
        ("position loop kd", 200, (0, 32767), 0x08),
        ("position loop kvff", 30, (0, 32767), 0x0D),
        ("holding current (%)", 40, (0, 100), 0x50),
        ("open-loop current (%)", 50, (0, 100), 0x51),
        ("closed-loop current (%)", 100, (0, 100), 0x52),
        ("anti-interference time", 1000, (0, 1000), 0x53),
        // 0 = high level, 1 = low level
        ("enable control", 1, (0, 1), 0x96),
        // 0 = active high, 1 = active low
        ("fault output", 0, (0, 1), 0x97),
        ("filtering enable", 0, (0, 1), 0x54),
        ("filtering time (us)", 25600, (50, 25600), 0x55),
        ("reserved (pulse mode)?", 0, (0, 1), 0x4F),
        // 4 = rising, 6 = falling
        ("pulse active edge", 4, (4, 6), 0xFF),
        ("reserved (direction)?", 130, (0, 1), REG_INTRODUCTION),
        ("reserved (bandwidth)?", 1, (0, 1), 0x90),
        ("current loop auto-configuration?", 1, (0, 1), 0x40),
    ];

    table
        .into_iter()
        .map(|(description, default, (min, max), register)| {
            Command::read(description, register, 1)
                .with_default(default)
                .with_range(min, max)
        })
        .collect()
}

/// Read sent once after opening the port. The drive answers 0x82.
pub fn introduction() -> Command {
    Command::read("introduction", REG_INTRODUCTION, 1)
}

/// Writes that arm the scope for captures of `duration_ticks` × 10 ms.
pub fn scope_setup(duration_ticks: u16) -> Vec<BatchStep> {
    vec![
        Command::write("scope duration", REG_SCOPE_DURATION, duration_ticks).into(),
        Command::write("scope enable a", REG_SCOPE_ENABLE_A, 1).into(),
        Command::write("scope enable b", REG_SCOPE_ENABLE_B, 0).into(),
    ]
}

pub fn scope_begin() -> Command {
    Command::write("scope begin", REG_SCOPE_TRIGGER, 1)
}

pub fn scope_status() -> Command {
    Command::read("scope status", REG_SCOPE_STATUS, 1)
}

/// Ends the capture; the drive answers with `count` sample words.
pub fn scope_end(count: u16) -> Command {
    Command::read("scope end", REG_SCOPE_TRIGGER, count)
}

pub fn alarm_summary() -> Command {
    Command::read("read alarms", REG_ALARMS, ALARM_WORDS)
}

pub fn alarm_ack() -> Command {
    Command::read("acknowledge alarms", REG_ALARMS, 1)
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "command")]
    commands: Vec<Command>,
}

/// An ordered, externally supplied set of commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterCatalog {
    commands: Vec<Command>,
}

impl RegisterCatalog {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    /// The built-in drive parameter table.
    pub fn builtin() -> Self {
        Self::new(parameters())
    }

    /// Parse a catalog of `[[command]]` tables.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: CatalogFile =
            toml::from_str(text).map_err(|e| DriverError::Catalog(e.to_string()))?;
        Ok(Self::new(file.commands))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| DriverError::Catalog(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let file = CatalogFile {
            commands: self.commands.clone(),
        };
        toml::to_string(&file).map_err(|e| DriverError::Catalog(e.to_string()))
    }

    pub fn get(&self, description: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.description == description)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// All commands as a batch, in catalog order.
    pub fn batch(&self) -> Vec<BatchStep> {
        self.commands.iter().cloned().map(BatchStep::Run).collect()
    }
}
