//! Colored progress lines for pipeline events

use colored::Colorize;
use crossbeam_channel::Receiver;
use lifeport::pipeline::ProgressEvent;
use lifeport::sandbox::ObjectState;
use may::coroutine::JoinHandle;

/// Drain `events` in a coroutine until every sender is dropped
pub fn spawn(events: Receiver<ProgressEvent>, verbose: bool) -> JoinHandle<()> {
    may::go!(move || {
        for event in events.iter() {
            if let Some(line) = render(&event, verbose) {
                println!("{}", line);
            }
        }
    })
}

/// One display line per event; per-object lines only when `verbose` or failed
pub fn render(event: &ProgressEvent, verbose: bool) -> Option<String> {
    match event {
        ProgressEvent::PhaseStarted(phase) => {
            Some(format!("{} {}", "▶".cyan(), phase.to_string().bold()))
        }
        ProgressEvent::PhaseFinished { phase, ok: true } => {
            Some(format!("{} {}", "✓".green(), phase))
        }
        ProgressEvent::PhaseFinished { phase, ok: false } => {
            Some(format!("{} {}", "✗".red(), phase.to_string().red()))
        }
        ProgressEvent::ObjectExecuted {
            name,
            object_type,
            state,
        } => match state {
            ObjectState::Failed => Some(format!("  {} {} {}", "✗".red(), object_type, name.red())),
            ObjectState::Success if verbose => {
                Some(format!("  {} {} {}", "✓".green(), object_type, name))
            }
            _ => None,
        },
        ProgressEvent::TableMigrated { table, rows, ok } => {
            let mark = if *ok { "✓".green() } else { "✗".red() };
            Some(format!("  {} {} ({} rows)", mark, table, rows))
        }
        ProgressEvent::RepairCycle { attempt, failures } => Some(format!(
            "  {} repair cycle {}: {} failing object(s)",
            "↻".yellow(),
            attempt,
            failures
        )),
    }
}
