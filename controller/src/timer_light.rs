use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use stove_common::{command_payload, parse_occupancy, LocationConfig, PowerState, TimerLightConfig};
use tokio::{sync::mpsc, time::Instant};
use tracing::{debug, info, warn};

use crate::bus::{BusMessage, BusPublisher};

pub trait Daylight {
    fn is_sun_up(&self) -> bool;
}

/// Sun position for a fixed site, from the current UTC date.
pub struct SolarDaylight {
    location: LocationConfig,
}

impl SolarDaylight {
    pub fn new(location: LocationConfig) -> Self {
        Self { location }
    }
}

impl Daylight for SolarDaylight {
    fn is_sun_up(&self) -> bool {
        sun_up_at(&self.location, Utc::now())
    }
}

pub fn sun_up_at(location: &LocationConfig, at: DateTime<Utc>) -> bool {
    let (sunrise, sunset) = sunrise::sunrise_sunset(
        location.latitude,
        location.longitude,
        at.year(),
        at.month(),
        at.day(),
    );
    let now = at.timestamp();
    now > sunrise && now < sunset
}

struct LightGroup {
    config: TimerLightConfig,
    off_at: Option<Instant>,
    // Stays set after the timer fires; only a never-armed group is switched
    // off by a no-occupancy report at night.
    armed: bool,
}

/// Occupancy-driven lights. After dark, presence switches the group on and
/// (re)starts its off timer; during the day lights are only ever switched off.
pub struct TimerLightNode<B, D> {
    groups: Vec<LightGroup>,
    bus: B,
    daylight: D,
}

impl<B: BusPublisher, D: Daylight> TimerLightNode<B, D> {
    pub fn new(configs: Vec<TimerLightConfig>, bus: B, daylight: D) -> Self {
        let groups = configs
            .into_iter()
            .map(|config| LightGroup {
                config,
                off_at: None,
                armed: false,
            })
            .collect();
        Self {
            groups,
            bus,
            daylight,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<BusMessage>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(&event.topic, &event.payload, Instant::now()).await,
                    None => break,
                },
                _ = sleep_until(deadline) => self.expire(Instant::now()).await,
            }
        }
        debug!("timer light node stopped");
    }

    /// Earliest pending off timer across all groups.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.groups.iter().filter_map(|group| group.off_at).min()
    }

    pub async fn handle(&mut self, topic: &str, payload: &[u8], now: Instant) {
        let occupied = match parse_occupancy(payload) {
            Ok(occupied) => occupied,
            Err(err) => {
                warn!("bad occupancy payload on {topic}: {err}");
                return;
            }
        };
        let sun_up = self.daylight.is_sun_up();

        for group in self
            .groups
            .iter_mut()
            .filter(|group| group.config.sensor_topics.iter().any(|t| t == topic))
        {
            if occupied {
                group.off_at = None;
                if sun_up {
                    debug!("occupancy on {topic} in daylight, lights left alone");
                    continue;
                }
                switch_lights(&self.bus, &group.config.light_topics, PowerState::On).await;
                group.off_at = Some(now + Duration::from_secs(group.config.off_delay_secs));
                group.armed = true;
            } else if !group.armed || sun_up {
                switch_lights(&self.bus, &group.config.light_topics, PowerState::Off).await;
            }
        }
    }

    /// Switch off every group whose timer is due at `now`.
    pub async fn expire(&mut self, now: Instant) {
        for group in self
            .groups
            .iter_mut()
            .filter(|group| group.off_at.is_some_and(|at| at <= now))
        {
            group.off_at = None;
            info!("off timer elapsed for {}", group.config.light_topics.join(", "));
            switch_lights(&self.bus, &group.config.light_topics, PowerState::Off).await;
        }
    }
}

async fn switch_lights<B: BusPublisher>(bus: &B, topics: &[String], state: PowerState) {
    for topic in topics {
        info!("turning {topic} {}", state.as_str());
        if let Err(err) = bus.publish(topic, command_payload(state)).await {
            warn!("error publishing light command to {topic}: {err}");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
