//! Line commands for the live console.

use std::fmt::Write as _;

use anyhow::{anyhow, bail, Result};
use stomp_engine::{ChainStatus, Controller, ReverbStatus, StageKind};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Toggle(StageKind),
    Boost(f32),
    Distortion(f32),
    DelayTime(f32),
    Feedback(f32),
    Mix(f32),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  toggle <boost|distortion|delay|reverb>
  boost <gain>          distortion <amount>
  time <seconds>        feedback <0..1>      mix <0..1>
  status                help                 quit";

pub fn parse(line: &str) -> Result<ConsoleCommand> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        bail!("empty command");
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        bail!("unexpected argument '{extra}'");
    }
    let number = |name: &str| -> Result<f32> {
        let raw = arg.ok_or_else(|| anyhow!("{name} needs a value"))?;
        raw.parse::<f32>().map_err(|_| anyhow!("'{raw}' is not a number"))
    };

    let cmd = match head.to_ascii_lowercase().as_str() {
        "toggle" | "t" => {
            let raw = arg.ok_or_else(|| anyhow!("toggle needs a stage name"))?;
            ConsoleCommand::Toggle(raw.parse()?)
        }
        "boost" | "gain" => ConsoleCommand::Boost(number("boost")?),
        "distortion" | "dist" => ConsoleCommand::Distortion(number("distortion")?),
        "time" | "delay-time" => ConsoleCommand::DelayTime(number("time")?),
        "feedback" | "fb" => ConsoleCommand::Feedback(number("feedback")?),
        "mix" => ConsoleCommand::Mix(number("mix")?),
        "status" | "s" if arg.is_none() => ConsoleCommand::Status,
        "help" | "?" if arg.is_none() => ConsoleCommand::Help,
        "quit" | "exit" | "q" if arg.is_none() => ConsoleCommand::Quit,
        other => bail!("unknown command '{other}' (try 'help')"),
    };
    Ok(cmd)
}

/// Applies a command. Returns text to print, if any.
pub fn apply(controller: &mut Controller, cmd: &ConsoleCommand) -> Result<Option<String>> {
    let reply = match *cmd {
        ConsoleCommand::Toggle(kind) => {
            let on = controller.toggle(kind)?;
            let mut msg = format!("{kind} {}", if on { "on" } else { "off" });
            if on && !controller.router().is_ready(kind) {
                msg.push_str(" (not loaded yet)");
            }
            Some(msg)
        }
        ConsoleCommand::Boost(v) => {
            controller.set_boost_gain(v)?;
            None
        }
        ConsoleCommand::Distortion(v) => {
            controller.set_distortion_amount(v)?;
            None
        }
        ConsoleCommand::DelayTime(v) => {
            controller.set_delay_time(v)?;
            None
        }
        ConsoleCommand::Feedback(v) => {
            controller.set_delay_feedback(v)?;
            None
        }
        ConsoleCommand::Mix(v) => {
            controller.set_delay_mix(v)?;
            None
        }
        ConsoleCommand::Status => Some(render_status(&controller.status())),
        ConsoleCommand::Help => Some(HELP.to_string()),
        ConsoleCommand::Quit => None,
    };
    Ok(reply)
}

pub fn render_status(s: &ChainStatus) -> String {
    let mut out = String::new();
    for kind in StageKind::ORDER {
        let state = if s.active.contains(&kind) {
            "active"
        } else if s.enabled[kind.index()] {
            "waiting"
        } else {
            "off"
        };
        let _ = writeln!(out, "{:<11}{state}", kind.name());
    }
    let _ = writeln!(out, "boost      gain {:.2}", s.boost_gain);
    let _ = writeln!(out, "distortion amount {:.1}", s.distortion_amount);
    let _ = writeln!(
        out,
        "delay      time {:.3}s feedback {:.2} mix {:.2}",
        s.delay_time, s.delay_feedback, s.delay_mix
    );
    let reverb = match &s.reverb {
        ReverbStatus::Loading => "loading".to_string(),
        ReverbStatus::Ready => "ready".to_string(),
        ReverbStatus::Failed(e) => format!("failed: {e}"),
    };
    let _ = write!(out, "reverb     {reverb}");
    out
}
