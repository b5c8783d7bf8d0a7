use crate::{
    config::ControlSettings,
    types::{ControllerPhase, ControllerStatus, DesiredState, PowerState},
};

/// Hysteresis controller for a single pellet stove.
///
/// Holds the three independently learned facts (room temperature, stove power
/// state, remote setpoint/enable) and turns them into at most one command per
/// update. Every `update_*` method re-evaluates and returns the command the
/// caller must publish, if any. The engine has already assumed the command
/// took effect when it returns it.
#[derive(Debug, Clone)]
pub struct StoveEngine {
    current_temp: f64,
    temperature_known: bool,
    appliance_on: bool,
    appliance_state_known: bool,
    setpoint: f64,
    margin: f64,
    master_enabled: bool,

    last_command: Option<PowerState>,
    commands_issued: u64,
}

impl StoveEngine {
    pub fn new(settings: &ControlSettings) -> Self {
        Self {
            current_temp: 0.0,
            temperature_known: false,
            appliance_on: false,
            appliance_state_known: false,
            setpoint: settings.default_setpoint,
            margin: settings.margin.max(0.0),
            master_enabled: false,
            last_command: None,
            commands_issued: 0,
        }
    }

    pub fn current_temp(&self) -> Option<f64> {
        self.temperature_known.then_some(self.current_temp)
    }

    pub fn appliance_state(&self) -> Option<PowerState> {
        self.appliance_state_known
            .then(|| PowerState::from_on(self.appliance_on))
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    pub fn is_master_enabled(&self) -> bool {
        self.master_enabled
    }

    pub fn commands_issued(&self) -> u64 {
        self.commands_issued
    }

    pub fn update_temperature(&mut self, temp: f64) -> Option<PowerState> {
        if !temp.is_finite() {
            return None;
        }
        self.current_temp = temp;
        self.temperature_known = true;
        self.evaluate()
    }

    /// Authoritative report from the device; always replaces the optimistic belief.
    pub fn update_appliance_state(&mut self, state: PowerState) -> Option<PowerState> {
        self.appliance_on = state.is_on();
        self.appliance_state_known = true;
        self.evaluate()
    }

    pub fn apply_desired_state(&mut self, desired: DesiredState) -> Option<PowerState> {
        if !desired.setpoint.is_finite() {
            return None;
        }
        self.setpoint = desired.setpoint;
        self.master_enabled = desired.enabled;
        self.evaluate()
    }

    /// Re-run the decision against the current facts, issuing a command if one is due.
    pub fn evaluate(&mut self) -> Option<PowerState> {
        let command = match self.phase() {
            ControllerPhase::CommandingOn => PowerState::On,
            ControllerPhase::CommandingOff => PowerState::Off,
            _ => return None,
        };
        self.issue_command(command);
        Some(command)
    }

    /// What the next evaluation would do. Both dead-band edges are exclusive.
    pub fn phase(&self) -> ControllerPhase {
        if !self.temperature_known {
            return ControllerPhase::AwaitingTemperature;
        }
        if !self.appliance_state_known {
            return ControllerPhase::AwaitingApplianceState;
        }

        if !self.master_enabled {
            return if self.appliance_on {
                ControllerPhase::CommandingOff
            } else {
                ControllerPhase::Disabled
            };
        }

        let lower_bound = self.setpoint - self.margin;
        let upper_bound = self.setpoint + self.margin;

        if self.current_temp < lower_bound && !self.appliance_on {
            ControllerPhase::CommandingOn
        } else if self.current_temp > upper_bound && self.appliance_on {
            ControllerPhase::CommandingOff
        } else {
            ControllerPhase::Idle
        }
    }

    pub fn status(&self, last_remote_sync_epoch: Option<i64>) -> ControllerStatus {
        ControllerStatus {
            current_temp: self.current_temp(),
            appliance_on: self.appliance_state().map(PowerState::is_on),
            setpoint: self.setpoint,
            margin: self.margin,
            master_enabled: self.master_enabled,
            phase: self.phase().as_str(),
            last_command: self.last_command.map(PowerState::as_str),
            commands_issued: self.commands_issued,
            last_remote_sync_epoch,
        }
    }

    fn issue_command(&mut self, command: PowerState) {
        self.appliance_on = command.is_on();
        self.appliance_state_known = true;
        self.last_command = Some(command);
        self.commands_issued = self.commands_issued.saturating_add(1);
    }
}
