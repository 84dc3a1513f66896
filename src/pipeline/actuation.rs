//! Debounced motor and LED actuation
//!
//! Accepted classifications are mapped through a command table onto the
//! motor direction register, the two PWM channels and the LED bank. After
//! a change the state is frozen for `debounce_ticks` iterations, so one
//! spoken keyword that stays in view over several overlapping windows
//! moves the robot once.

use serde::Serialize;

use crate::config::AppConfig;
use crate::hal::GpioBank;
use crate::pipeline::classify::ClassificationResult;

pub use crate::hal::{MotorChannel, MotorDirection, PwmSetting};

/// Outputs driven for one class
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandAction {
    pub class_index: usize,
    pub label: String,
    pub direction: MotorDirection,
    pub left: PwmSetting,
    pub right: PwmSetting,
    pub leds: u8,
    /// Confidence the class has to exceed
    pub threshold: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    actions: Vec<CommandAction>,
}

impl CommandTable {
    pub fn from_config(config: &AppConfig) -> Self {
        let actuation = &config.actuation;
        let actions = actuation
            .commands
            .iter()
            .filter_map(|command| {
                let Some(class_index) = config.model.labels.iter().position(|l| *l == command.label)
                else {
                    log::warn!("[Actuation] Ignoring command for unknown label {:?}", command.label);
                    return None;
                };
                Some(CommandAction {
                    class_index,
                    label: command.label.clone(),
                    direction: command.direction,
                    left: PwmSetting {
                        period: actuation.pwm_period,
                        duty: command.left_duty,
                    },
                    right: PwmSetting {
                        period: actuation.pwm_period,
                        duty: command.right_duty,
                    },
                    leds: command.leds,
                    threshold: command
                        .threshold
                        .unwrap_or_else(|| config.classification.threshold_for(&command.label)),
                })
            })
            .collect();

        Self { actions }
    }

    pub fn get(&self, class_index: usize) -> Option<&CommandAction> {
        self.actions.iter().find(|a| a.class_index == class_index)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Active command plus debounce countdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandState {
    active: Option<usize>,
    countdown: u32,
    max_ticks: u32,
}

impl CommandState {
    pub fn new(max_ticks: u32) -> Self {
        Self {
            active: None,
            countdown: 0,
            max_ticks,
        }
    }

    /// Class of the command currently driven
    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    /// Apply an accepted classification; returns whether outputs changed
    pub fn handle_event(
        &mut self,
        result: &ClassificationResult,
        table: &CommandTable,
        gpio: &mut dyn GpioBank,
    ) -> bool {
        if self.countdown > 0 || self.active == Some(result.class_index) {
            return false;
        }
        let Some(action) = table.get(result.class_index) else {
            return false;
        };
        if result.confidence <= action.threshold {
            return false;
        }

        gpio.set_motor_direction(action.direction);
        gpio.set_motor_pwm(MotorChannel::Left, action.left);
        gpio.set_motor_pwm(MotorChannel::Right, action.right);
        gpio.set_leds(action.leds);

        tracing::info!(
            "[Actuation] {} -> {:?}, duty {}/{}, leds {:#06b}",
            action.label,
            action.direction,
            action.left.duty,
            action.right.duty,
            action.leds
        );

        self.active = Some(result.class_index);
        self.countdown = self.max_ticks;
        true
    }

    /// Once per iteration, after `handle_event`
    pub fn tick(&mut self) {
        self.countdown = self.countdown.saturating_sub(1);
    }
}
