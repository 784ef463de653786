//! One-shot timers
//!
//! The stack seam arms and stops timers synchronously; this task turns the
//! latest command into a deadline and reports expiry as an event.

use defmt::{debug, Format};
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use nrf52_proto_peripheral::ble::events::TimerId;
use nrf52_proto_peripheral::BleEvent;

use super::EVENTS;

#[derive(Debug, Clone, Copy, Format)]
pub enum TimerCommand {
    Start(TimerId, Duration),
    Stop(TimerId),
}

/// Only the most recent command matters, so a signal is enough
pub static TIMER_COMMANDS: Signal<CriticalSectionRawMutex, TimerCommand> = Signal::new();

#[embassy_executor::task]
pub async fn timer_task() -> ! {
    let mut armed: Option<(TimerId, Instant)> = None;

    loop {
        let command = match armed {
            Some((timer, deadline)) => match select(TIMER_COMMANDS.wait(), Timer::at(deadline)).await {
                Either::First(command) => command,
                Either::Second(()) => {
                    armed = None;
                    debug!("TIMER: {} expired", timer.label());
                    EVENTS.send(BleEvent::TimerExpired(timer)).await;
                    continue;
                }
            },
            None => TIMER_COMMANDS.wait().await,
        };

        armed = match command {
            TimerCommand::Start(timer, after) => Some((timer, Instant::now() + after)),
            TimerCommand::Stop(_) => None,
        };
    }
}
