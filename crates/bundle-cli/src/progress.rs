//! Terminal rendering of coordinator events.

use std::sync::{Mutex, PoisonError};

use bundle_updater::{DownloadProgress, UpdateEvent, UpdateListener, format_speed};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {bytes} {msg}";

/// Prints step messages and draws a download bar on stderr.
pub struct TerminalListener {
    quiet: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl TerminalListener {
    /// With `quiet` set nothing is drawn.
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            bar: Mutex::new(None),
        }
    }

    fn draw(&self, progress: &DownloadProgress) {
        let mut slot = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = slot.get_or_insert_with(|| new_bar(progress.total));
        if progress.total > 0 && bar.length() != Some(progress.total) {
            bar.set_length(progress.total);
        }
        bar.set_position(progress.downloaded);
        bar.set_message(format_speed(progress.speed));
    }

    fn finish(&self) {
        let bar = self
            .bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    }

    fn say(&self, line: &str) {
        let slot = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(bar) => bar.println(line),
            None => eprintln!("{line}"),
        }
    }
}

fn new_bar(total: u64) -> ProgressBar {
    let (bar, template) = if total > 0 {
        (ProgressBar::new(total), BAR_TEMPLATE)
    } else {
        (ProgressBar::no_length(), SPINNER_TEMPLATE)
    };
    bar.set_draw_target(ProgressDrawTarget::stderr());
    match ProgressStyle::with_template(template) {
        Ok(style) => bar.set_style(style.progress_chars("=> ")),
        Err(e) => tracing::debug!("Invalid progress template: {}", e),
    }
    bar
}

impl UpdateListener for TerminalListener {
    fn on_event(&self, event: &UpdateEvent) {
        match event {
            UpdateEvent::Progress(text) if !self.quiet => self.say(text),
            UpdateEvent::Download(progress) if !self.quiet => self.draw(progress),
            UpdateEvent::Installed(_)
            | UpdateEvent::Canceled
            | UpdateEvent::Failed { .. }
            | UpdateEvent::BusyChanged(false) => self.finish(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_lifecycle() {
        let listener = TerminalListener::new(false);
        listener.on_event(&UpdateEvent::Download(DownloadProgress {
            downloaded: 10,
            total: 100,
            speed: 5,
        }));
        let length = listener
            .bar
            .lock()
            .unwrap()
            .as_ref()
            .and_then(ProgressBar::length);
        assert_eq!(length, Some(100));

        listener.on_event(&UpdateEvent::BusyChanged(false));
        assert!(listener.bar.lock().unwrap().is_none());
    }

    #[test]
    fn test_quiet_draws_nothing() {
        let listener = TerminalListener::new(true);
        listener.on_event(&UpdateEvent::Download(DownloadProgress {
            downloaded: 10,
            total: 100,
            speed: 5,
        }));
        assert!(listener.bar.lock().unwrap().is_none());
    }
}
