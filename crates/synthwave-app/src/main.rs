mod app;
mod audio;
mod capture;
mod error;
mod gpu;
mod keys;
mod pacing;
mod render;
mod settings;
mod theme;
mod visual;

use std::sync::Arc;

use anyhow::Result;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, KeyEvent, StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{ModifiersState, PhysicalKey};
use winit::window::{WindowAttributes, WindowId};

use app::App;
use visual::ShellCommand;

/// Command-line options.
#[derive(Debug, Default)]
struct Options {
    reset_settings: bool,
    device: Option<String>,
    theme: Option<String>,
}

impl Options {
    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut options = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--reset-settings" => options.reset_settings = true,
                "--device" => options.device = args.next(),
                "--theme" => options.theme = args.next(),
                other => log::warn!("Ignoring unknown argument '{other}'"),
            }
        }
        options
    }
}

struct SynthwaveApp {
    app: Option<App>,
    options: Options,
    modifiers: ModifiersState,
}

impl SynthwaveApp {
    fn new(options: Options) -> Self {
        Self {
            app: None,
            options,
            modifiers: ModifiersState::empty(),
        }
    }
}

impl ApplicationHandler for SynthwaveApp {
    fn new_events(&mut self, _event_loop: &ActiveEventLoop, cause: StartCause) {
        if let (StartCause::ResumeTimeReached { .. }, Some(app)) = (cause, &self.app) {
            app.window.request_redraw();
        }
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.app.is_some() {
            return;
        }

        let attrs = WindowAttributes::default()
            .with_title("Synthwave")
            .with_inner_size(winit::dpi::LogicalSize::new(1280, 720));
        let window = match event_loop.create_window(attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("Failed to create window: {e}");
                event_loop.exit();
                return;
            }
        };

        // Center window on primary monitor
        if let Some(monitor) = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
        {
            let monitor_size = monitor.size();
            let window_size = window.outer_size();
            let monitor_pos = monitor.position();
            let x = (monitor_size.width.saturating_sub(window_size.width)) / 2;
            let y = (monitor_size.height.saturating_sub(window_size.height)) / 2;
            window.set_outer_position(winit::dpi::PhysicalPosition::new(
                monitor_pos.x + x as i32,
                monitor_pos.y + y as i32,
            ));
        }

        match App::new(window, self.options.reset_settings) {
            Ok(mut app) => {
                if let Some(device) = self.options.device.take() {
                    app.apply(ShellCommand::SelectDevice(device));
                }
                if let Some(name) = self.options.theme.take() {
                    match theme::index_of(&name) {
                        Some(index) => app.apply(ShellCommand::SetTheme(index)),
                        None => log::warn!("Unknown theme '{name}'"),
                    }
                }
                app.window.request_redraw();
                self.app = Some(app);
                log::info!("Synthwave initialized");
            }
            Err(e) => {
                log::error!("Failed to initialize app: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        let Some(app) = self.app.as_mut() else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                app.quit_requested = true;
            }
            WindowEvent::Resized(size) => {
                app.resize(size.width, size.height);
            }
            WindowEvent::ModifiersChanged(modifiers) => {
                self.modifiers = modifiers.state();
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(command) = keys::command_for_key(key, self.modifiers) {
                    app.apply(command);
                }
            }
            WindowEvent::RedrawRequested => {
                if !app.redraw() {
                    app.quit_requested = true;
                }
            }
            _ => {}
        }

        if app.quit_requested {
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(app) = &self.app {
            event_loop.set_control_flow(ControlFlow::WaitUntil(app.next_deadline()));
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut app) = self.app.take() {
            app.shutdown();
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let options = Options::parse(std::env::args().skip(1));
    if options.reset_settings {
        log::info!("Ignoring stored settings");
    }

    let event_loop = EventLoop::new()?;
    let mut app = SynthwaveApp::new(options);
    event_loop.run_app(&mut app)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Options {
        Options::parse(args.iter().map(|a| (*a).to_string()))
    }

    #[test]
    fn no_arguments_keep_stored_settings() {
        let options = parse(&[]);
        assert!(!options.reset_settings);
        assert_eq!(options.device, None);
    }

    #[test]
    fn reset_and_device_flags() {
        let options = parse(&["--reset-settings", "--device", "Line In"]);
        assert!(options.reset_settings);
        assert_eq!(options.device.as_deref(), Some("Line In"));
    }

    #[test]
    fn theme_flag_takes_a_name() {
        let options = parse(&["--theme", "ocean"]);
        assert_eq!(options.theme.as_deref(), Some("ocean"));
        assert_eq!(theme::index_of("ocean"), Some(3));
    }
}
