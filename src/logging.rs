//! 프로세스 전역 로거 훅
//!
//! 포맷된 로그 한 줄마다 콜백을 호출하는 `tracing_subscriber::fmt` 구독자를 설치한다.

use std::io;
use std::sync::Arc;
use tracing_subscriber::fmt::MakeWriter;

type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// 로그 줄을 콜백으로 넘기는 writer 팩토리
#[derive(Clone)]
pub struct CallbackMakeWriter {
    callback: LogCallback,
}

impl CallbackMakeWriter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        CallbackMakeWriter {
            callback: Arc::new(callback),
        }
    }
}

impl<'a> MakeWriter<'a> for CallbackMakeWriter {
    type Writer = CallbackWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CallbackWriter {
            callback: self.callback.clone(),
            buffer: Vec::new(),
        }
    }
}

/// 이벤트 하나를 모았다가 flush/drop 시점에 줄 단위로 전달
pub struct CallbackWriter {
    callback: LogCallback,
    buffer: Vec<u8>,
}

impl CallbackWriter {
    fn emit(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.buffer);
        for line in text.lines().filter(|l| !l.is_empty()) {
            (self.callback)(line);
        }
        self.buffer.clear();
    }
}

impl io::Write for CallbackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit();
        Ok(())
    }
}

impl Drop for CallbackWriter {
    fn drop(&mut self) {
        self.emit();
    }
}

/// 전역 로거 설치. 이미 전역 구독자가 있으면 `false`
pub fn set_logger<F>(callback: F) -> bool
where
    F: Fn(&str) + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_writer(CallbackMakeWriter::new(callback))
        .with_ansi(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tracing::info;

    #[test]
    fn test_lines_reach_callback() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(CallbackMakeWriter::new(move |line: &str| {
                sink.lock().push(line.to_string())
            }))
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            info!(capacity = 2, "Bridge created");
            info!("Connection closed");
        });

        let lines = lines.lock();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Bridge created"));
        assert!(lines[0].contains("capacity=2"));
        assert!(lines[1].contains("Connection closed"));
    }

    #[test]
    fn test_writer_splits_multiline_writes() {
        use std::io::Write;

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let make = CallbackMakeWriter::new(move |line: &str| sink.lock().push(line.to_string()));

        let mut writer = make.make_writer();
        writer.write_all(b"first\nsecond\n").unwrap();
        drop(writer);

        assert_eq!(*lines.lock(), vec!["first".to_string(), "second".to_string()]);
    }
}
