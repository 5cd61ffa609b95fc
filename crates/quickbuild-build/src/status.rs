//! ステータス出力先
//!
//! パイプラインの各ステージは注入された [`StatusSink`] に追記だけを行う。
//! 複数のパイプラインから同時に書き込まれても安全であること。

use std::sync::{Mutex, MutexGuard};

pub trait StatusSink: Send + Sync {
    /// 1行追記
    fn append_line(&self, line: &str);

    /// 失敗を1行追記
    fn append_error(&self, line: &str) {
        self.append_line(line);
    }

    /// 出力をユーザーの目に入るようにする
    fn show(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: StatusKind,
    pub text: String,
}

/// 出力をメモリに溜める sink
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<StatusLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<StatusLine>> {
        // 書き込み途中で panic しても履歴は読めるようにする
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn entries(&self) -> Vec<StatusLine> {
        self.guard().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.guard().iter().map(|l| l.text.clone()).collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.guard()
            .iter()
            .filter(|l| l.kind == StatusKind::Error)
            .map(|l| l.text.clone())
            .collect()
    }

    fn push(&self, kind: StatusKind, text: &str) {
        self.guard().push(StatusLine {
            kind,
            text: text.to_string(),
        });
    }
}

impl StatusSink for MemorySink {
    fn append_line(&self, line: &str) {
        self.push(StatusKind::Info, line);
    }

    fn append_error(&self, line: &str) {
        self.push(StatusKind::Error, line);
    }
}
