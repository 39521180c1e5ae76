pub mod dashboard;
pub mod prompt;

use ratatui::Frame;

use crate::app::{App, AppState};

/// Main draw function that dispatches to appropriate view
pub fn draw(frame: &mut Frame, app: &App) {
    dashboard::draw_dashboard(frame, app);

    match &app.state {
        AppState::Starting => {
            prompt::draw_status_message(frame, app, "Preparing...", prompt::MessageType::Info);
        }
        AppState::InProgress(stage) => {
            prompt::draw_status_message(frame, app, stage.message(), prompt::MessageType::Info);
        }
        AppState::Error(msg) => {
            prompt::draw_status_message(frame, app, msg, prompt::MessageType::Error);
        }
        AppState::Success(msg) => {
            prompt::draw_status_message(frame, app, msg, prompt::MessageType::Success);
        }
    }
}
