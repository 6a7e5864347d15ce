use winit::keyboard::{KeyCode, ModifiersState};

use crate::visual::{ShellCommand, VisualizationMode};

const SENSITIVITY_STEP: f32 = 0.1;

/// Maps a pressed key to the shell command it triggers.
pub fn command_for_key(key: KeyCode, mods: ModifiersState) -> Option<ShellCommand> {
    let ctrl = mods.control_key() || mods.super_key();
    let shift = mods.shift_key();

    if ctrl {
        return match key {
            KeyCode::KeyS if shift => Some(ShellCommand::Screenshot),
            KeyCode::KeyR => Some(ShellCommand::ToggleRecording),
            KeyCode::KeyQ => Some(ShellCommand::Quit),
            _ => None,
        };
    }

    let command = match key {
        KeyCode::Digit1 | KeyCode::Numpad1 => ShellCommand::SetMode(mode(1)?),
        KeyCode::Digit2 | KeyCode::Numpad2 => ShellCommand::SetMode(mode(2)?),
        KeyCode::Digit3 | KeyCode::Numpad3 => ShellCommand::SetMode(mode(3)?),
        KeyCode::Digit4 | KeyCode::Numpad4 => ShellCommand::SetMode(mode(4)?),
        KeyCode::Digit5 | KeyCode::Numpad5 => ShellCommand::SetMode(mode(5)?),
        KeyCode::Digit6 | KeyCode::Numpad6 => ShellCommand::SetMode(mode(6)?),
        KeyCode::Digit7 | KeyCode::Numpad7 => ShellCommand::SetMode(mode(7)?),
        KeyCode::KeyT => ShellCommand::CycleTheme,
        KeyCode::KeyI => ShellCommand::ToggleOverlay,
        KeyCode::KeyH => ShellCommand::ToggleControls,
        KeyCode::KeyS => ShellCommand::ToggleSettings,
        KeyCode::Space => ShellCommand::ToggleCapture,
        KeyCode::Equal | KeyCode::NumpadAdd => ShellCommand::AdjustSensitivity(SENSITIVITY_STEP),
        KeyCode::Minus | KeyCode::NumpadSubtract => {
            ShellCommand::AdjustSensitivity(-SENSITIVITY_STEP)
        }
        KeyCode::KeyF => ShellCommand::ToggleFullscreen,
        KeyCode::Escape => ShellCommand::ExitFullscreen,
        _ => return None,
    };
    Some(command)
}

fn mode(digit: u8) -> Option<VisualizationMode> {
    VisualizationMode::from_digit(digit)
}
