use crate::status::StatusSink;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

/// スピナー付きのターミナル出力 sink
///
/// 端末でない場合（パイプやリダイレクト）はスピナーが非表示になるため、
/// 行をそのまま標準出力・標準エラーに書く。
pub struct ConsoleSink {
    progress_bar: ProgressBar,
}

impl ConsoleSink {
    pub fn new(registry_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Building in {}...", registry_name));

        Self { progress_bar: pb }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn finish_success(&self, message: &str) {
        let message = format!("{} {}", "✓".green(), message);
        if self.progress_bar.is_hidden() {
            println!("{}", message);
        }
        self.progress_bar.finish_with_message(message);
    }

    pub fn finish_error(&self, error: &str) {
        let message = format!("{} {}", "✗".red(), error);
        if self.progress_bar.is_hidden() {
            eprintln!("{}", message);
        }
        self.progress_bar.finish_with_message(message);
    }
}

impl StatusSink for ConsoleSink {
    fn append_line(&self, line: &str) {
        if self.progress_bar.is_hidden() {
            println!("{}", line);
        } else {
            self.progress_bar.println(line);
        }
    }

    fn append_error(&self, line: &str) {
        let line = line.red().to_string();
        if self.progress_bar.is_hidden() {
            eprintln!("{}", line);
        } else {
            self.progress_bar.println(line);
        }
    }

    fn show(&self) {
        self.progress_bar.tick();
    }
}
