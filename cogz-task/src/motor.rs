//! Manual and vocal output modules.
//!
//! A request names a command in its `cmd` slot:
//!
//! | command       | slots        | task callback              |
//! |---------------|--------------|----------------------------|
//! | `press-key`   | `key`        | [`Task::type_key`]         |
//! | `click-mouse` |              | [`Task::click_mouse`]      |
//! | `move-cursor` | `x`, `y`     | [`Task::move_mouse`]       |
//! | `speak`       | `string`     | [`Task::speak`]            |
//!
//! The callback happens after the preparation time; the module stays busy
//! for a further execution time and then returns to `state free`. While a
//! movement is under way the `preparation`, `processor` and `execution`
//! status slots read `busy`.
//!
//! [`Task::type_key`]: cogz_core::task::Task::type_key
//! [`Task::click_mouse`]: cogz_core::task::Task::click_mouse
//! [`Task::move_mouse`]: cogz_core::task::Task::move_mouse
//! [`Task::speak`]: cogz_core::task::Task::speak

use std::collections::BTreeMap;

use cogz_core::chunk::Chunk;
use cogz_core::event::{ModuleKind, Time};
use cogz_core::module::{Module, ModuleContext};
use cogz_core::symbol::{Interner, Symbol, sym};
use tracing::{debug, warn};

/// Default seconds from request to output for a manual movement.
pub const MANUAL_PREPARATION: Time = 0.25;
/// Default seconds from request to output for an utterance.
pub const VOCAL_PREPARATION: Time = 0.2;
/// Default seconds the module stays busy after the output.
pub const EXECUTION: Time = 0.1;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    PressKey(char),
    Click,
    MoveCursor(f64, f64),
    Speak(String),
}

impl Command {
    fn from_request(request: &Chunk, symbols: &mut Interner) -> Option<Self> {
        let slot = |symbols: &mut Interner, name: &str| request.get(symbols.intern(name));
        let cmd = slot(symbols, "cmd");
        match symbols.name(cmd) {
            "press-key" => {
                let key = slot(symbols, "key");
                symbols.name(key).chars().next().filter(|_| key != sym::NIL).map(Self::PressKey)
            }
            "click-mouse" => Some(Self::Click),
            "move-cursor" => {
                let x = slot(symbols, "x");
                let y = slot(symbols, "y");
                Some(Self::MoveCursor(symbols.number(x)?, symbols.number(y)?))
            }
            "speak" => {
                let text = slot(symbols, "string");
                (text != sym::NIL).then(|| Self::Speak(symbols.name(text).to_owned()))
            }
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::PressKey(key) => format!("output-key {key}"),
            Self::Click => "click-mouse".to_owned(),
            Self::MoveCursor(x, y) => format!("move-cursor {x} {y}"),
            Self::Speak(text) => format!("output-speech {text}"),
        }
    }
}

#[derive(Debug)]
enum Stage {
    Output(Command),
    Finish,
}

/// A motor module serving one buffer.
#[derive(Debug)]
pub struct MotorModule {
    kind: ModuleKind,
    buffer: [&'static str; 1],
    preparation: Time,
    execution: Time,
    pending: BTreeMap<u64, Stage>,
    next_token: u64,
}

impl MotorModule {
    /// The manual module, serving `+manual>`.
    #[must_use]
    pub fn manual() -> Self {
        Self::new(ModuleKind::Manual, "manual", MANUAL_PREPARATION)
    }

    /// The vocal module, serving `+vocal>`.
    #[must_use]
    pub fn vocal() -> Self {
        Self::new(ModuleKind::Vocal, "vocal", VOCAL_PREPARATION)
    }

    fn new(kind: ModuleKind, buffer: &'static str, preparation: Time) -> Self {
        Self {
            kind,
            buffer: [buffer],
            preparation,
            execution: EXECUTION,
            pending: BTreeMap::new(),
            next_token: 0,
        }
    }

    /// Override the preparation and execution times.
    #[must_use]
    pub fn with_timing(mut self, preparation: Time, execution: Time) -> Self {
        self.preparation = preparation;
        self.execution = execution;
        self
    }

    fn schedule(&mut self, ctx: &mut ModuleContext<'_>, delay: Time, stage: Stage) {
        let token = self.next_token;
        self.next_token += 1;
        let description = match &stage {
            Stage::Output(command) => command.describe(),
            Stage::Finish => "finish-movement".to_owned(),
        };
        ctx.schedule(delay, description, token);
        self.pending.insert(token, stage);
    }

    fn set_busy(ctx: &mut ModuleContext<'_>, buffer: Symbol, busy: bool) {
        let value = if busy { sym::BUSY } else { sym::FREE };
        for slot in [sym::PREPARATION, sym::PROCESSOR, sym::EXECUTION] {
            ctx.buffers.set_status(buffer, slot, value);
        }
    }
}

impl Module for MotorModule {
    fn kind(&self) -> ModuleKind {
        self.kind
    }

    fn buffers(&self) -> &[&'static str] {
        &self.buffer
    }

    fn update(&mut self, ctx: &mut ModuleContext<'_>) {
        let buffer = ctx.symbols.intern(self.buffer[0]);
        let Some(request) = ctx.take_request(buffer) else {
            return;
        };
        match Command::from_request(&request, ctx.symbols) {
            Some(command) => {
                debug!(module = %self.kind, command = %command.describe(), "movement started");
                Self::set_busy(ctx, buffer, true);
                let delay = self.preparation;
                self.schedule(ctx, delay, Stage::Output(command));
            }
            None => {
                let text = request.describe(ctx.symbols);
                warn!(module = %self.kind, request = %text, "unrecognized motor command");
                ctx.trace(format!("warning: unrecognized command {text}"));
                ctx.buffers.set_error(buffer);
            }
        }
    }

    fn on_event(&mut self, token: u64, ctx: &mut ModuleContext<'_>) {
        let buffer = ctx.symbols.intern(self.buffer[0]);
        match self.pending.remove(&token) {
            Some(Stage::Output(command)) => {
                if let Some(task) = &mut ctx.task {
                    match &command {
                        Command::PressKey(key) => task.type_key(*key),
                        Command::Click => task.click_mouse(),
                        Command::MoveCursor(x, y) => task.move_mouse(*x, *y),
                        Command::Speak(text) => task.speak(text),
                    }
                }
                let delay = self.execution;
                self.schedule(ctx, delay, Stage::Finish);
            }
            Some(Stage::Finish) => {
                Self::set_busy(ctx, buffer, false);
                ctx.complete(buffer, None);
            }
            None => debug!(module = %self.kind, token, "stale motor event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_from_requests() {
        let mut symbols = Interner::new();
        let mut request = |pairs: &[(&str, &str)]| {
            let mut chunk = Chunk::new(symbols.intern("req"));
            for (slot, value) in pairs {
                chunk.set(symbols.intern(slot), symbols.intern(value));
            }
            Command::from_request(&chunk, &mut symbols)
        };
        assert_eq!(
            request(&[("cmd", "press-key"), ("key", "j")]),
            Some(Command::PressKey('j'))
        );
        assert_eq!(request(&[("cmd", "click-mouse")]), Some(Command::Click));
        assert_eq!(
            request(&[("cmd", "move-cursor"), ("x", "10"), ("y", "2.5")]),
            Some(Command::MoveCursor(10.0, 2.5))
        );
        assert_eq!(
            request(&[("cmd", "speak"), ("string", "hello")]),
            Some(Command::Speak("hello".to_owned()))
        );
        assert_eq!(request(&[("cmd", "press-key")]), None);
        assert_eq!(request(&[("cmd", "juggle")]), None);
    }

    #[test]
    fn modules_own_their_buffer() {
        assert_eq!(MotorModule::manual().buffers(), &["manual"]);
        assert_eq!(MotorModule::vocal().kind(), ModuleKind::Vocal);
        let fast = MotorModule::manual().with_timing(0.1, 0.0);
        assert!((fast.preparation - 0.1).abs() < 1e-12);
    }
}
