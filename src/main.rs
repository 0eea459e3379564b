//! umarell - event bus demo
//!
//! Two "labels" fed by the shared bus: one follows an observed counter that a
//! ticker bumps in the background, the other shows messages published on a
//! channel. Label updates are printed from the main thread.

mod config;
mod controller;
mod events;
mod ticker;

use config::DemoConfig;
use controller::DemoController;
use log::info;
use std::error::Error;
use std::thread;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    info!("Starting umarell demo...");

    let config = DemoConfig::from_env();
    info!(
        "Channel '{}', tick every {} ms, running {} ticks",
        config.channel_name, config.tick_interval_ms, config.run_ticks
    );

    let ui_rx = events::receiver();
    let controller = DemoController::new(config.clone(), umarell_bus::get_bus(), events::sender());

    controller.add_subscriber_to_property()?;
    controller.add_subscriber_to_channel()?;

    for _ in 0..config.run_ticks {
        thread::sleep(config.tick_interval());
        controller.send_message_to_channel()?;
        render(&ui_rx);
    }

    controller.remove_subscriber_to_property();
    controller.remove_subscriber_to_channel();
    render(&ui_rx);

    info!("Demo finished, timer value {}", controller.timer_value());
    Ok(())
}

/// Print the newest value of each label.
fn render(rx: &crossbeam_channel::Receiver<events::UiEvent>) {
    for event in events::drain_latest(rx) {
        println!("{}", event.label_text());
    }
}
