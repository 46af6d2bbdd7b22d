use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Error => "error",
        })
    }
}

/// User-facing toasts and prompts. The page's widget layer implements this;
/// the command line prints to stderr.
pub trait Notices: Send + Sync {
    fn toast(&self, level: NoticeLevel, message: &str);
    fn request_reload(&self, reason: &str);
}

pub struct ConsoleNotices;

impl Notices for ConsoleNotices {
    fn toast(&self, level: NoticeLevel, message: &str) {
        eprintln!("[{level}] {message}");
    }

    fn request_reload(&self, reason: &str) {
        eprintln!("[reload required] {reason}");
        eprintln!("Close other watchmark sessions and run the command again.");
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use std::sync::Mutex;

    use super::{NoticeLevel, Notices};

    #[derive(Default)]
    pub(crate) struct RecordingNotices {
        pub(crate) toasts: Mutex<Vec<(NoticeLevel, String)>>,
        pub(crate) reloads: Mutex<Vec<String>>,
    }

    impl RecordingNotices {
        pub(crate) fn toasts(&self) -> Vec<(NoticeLevel, String)> {
            self.toasts.lock().expect("toasts").clone()
        }

        pub(crate) fn reloads(&self) -> Vec<String> {
            self.reloads.lock().expect("reloads").clone()
        }
    }

    impl Notices for RecordingNotices {
        fn toast(&self, level: NoticeLevel, message: &str) {
            self.toasts
                .lock()
                .expect("toasts")
                .push((level, message.to_string()));
        }

        fn request_reload(&self, reason: &str) {
            self.reloads.lock().expect("reloads").push(reason.to_string());
        }
    }
}
