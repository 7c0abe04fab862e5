use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::error::GateError;

pub const DEFAULT_DELIMITER: &str = "EOF";

/// One run's worth of CI outputs: a single multi-line block plus optional
/// `key=value` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRecord {
    key: String,
    value: String,
    entries: Vec<(String, String)>,
}

impl OutputRecord {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            entries: Vec::new(),
        }
    }

    /// Adds a single-line entry. Line breaks in the value are flattened to
    /// spaces so they cannot start a new entry.
    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        self.entries.push((key.into(), value.replace(['\r', '\n'], " ")));
        self
    }

    /// `EOF`, or the first `EOF_<n>` that no line of the value equals. A
    /// trailing carriage return does not make a line distinct.
    pub fn delimiter(&self) -> String {
        let taken = |candidate: &str| {
            self.value
                .lines()
                .any(|line| line.trim_end_matches('\r') == candidate)
        };
        if !taken(DEFAULT_DELIMITER) {
            return DEFAULT_DELIMITER.to_owned();
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{DEFAULT_DELIMITER}_{n}");
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn render(&self) -> String {
        let delimiter = self.delimiter();
        let mut out = format!("{}<<{delimiter}\n{}\n{delimiter}\n", self.key, self.value);
        for (key, value) in &self.entries {
            out.push_str(&format!("{key}={value}\n"));
        }
        out
    }
}

pub trait OutputSink {
    fn append(&mut self, text: &str) -> Result<(), GateError>;
}

/// Appends to the file named by the runner's output variable.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OutputSink for FileSink {
    fn append(&mut self, text: &str) -> Result<(), GateError> {
        let to_error = |source| GateError::OutputSink {
            path: self.path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(to_error)?;
        file.write_all(text.as_bytes()).map_err(to_error)
    }
}

impl OutputSink for String {
    fn append(&mut self, text: &str) -> Result<(), GateError> {
        self.push_str(text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn renders_heredoc_block_then_entries() {
        let record = OutputRecord::new("result", "[OK]   WAF/a.yml\n[OK]   WAF/b.yml")
            .with_entry("status", "success")
            .with_entry("exit_code", "0");
        insta::assert_snapshot!(record.render(), @r"
        result<<EOF
        [OK]   WAF/a.yml
        [OK]   WAF/b.yml
        EOF
        status=success
        exit_code=0
        ");
    }

    #[test]
    fn delimiter_avoids_lines_in_the_value() {
        assert_eq!(OutputRecord::new("k", "EOF is fine inline").delimiter(), "EOF");
        assert_eq!(OutputRecord::new("k", "a\nEOF\nb").delimiter(), "EOF_1");
        assert_eq!(OutputRecord::new("k", "EOF\nEOF_1\r\nEOF_3").delimiter(), "EOF_2");

        let rendered = OutputRecord::new("result", "x\nEOF\ny").render();
        assert_eq!(rendered, "result<<EOF_1\nx\nEOF\ny\nEOF_1\n");
    }

    #[test]
    fn delimiter_ignores_carriage_returns() {
        let record = OutputRecord::new("result", "x\nEOF\r");
        assert_eq!(record.delimiter(), "EOF_1");

        let rendered = record.render();
        let lines: Vec<&str> = rendered
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .collect();
        let end = lines.iter().skip(1).position(|line| *line == "EOF_1").unwrap() + 1;
        assert_eq!(lines[0], "result<<EOF_1");
        assert_eq!(lines[1..end], ["x", "EOF"]);
        assert!(rendered.contains("x\nEOF\r\nEOF_1\n"), "{rendered:?}");
    }

    #[test]
    fn value_is_kept_verbatim() {
        for value in ["", "trailing\n", "  indented\n\n", "tabs\tand `ticks`"] {
            let rendered = OutputRecord::new("result", value).render();
            let inner = rendered
                .strip_prefix("result<<EOF\n")
                .and_then(|rest| rest.strip_suffix("\nEOF\n"))
                .unwrap();
            assert_eq!(inner, value);
        }
    }

    #[test]
    fn entries_cannot_span_lines() {
        let rendered = OutputRecord::new("result", "")
            .with_entry("status", "fail\ninjected=1")
            .render();
        assert!(rendered.ends_with("status=fail injected=1\n"), "{rendered}");
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github_output");
        fs::write(&path, "earlier=1\n").unwrap();

        let mut sink = FileSink::new(&path);
        sink.append("result<<EOF\nok\nEOF\n").unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "earlier=1\nresult<<EOF\nok\nEOF\n"
        );
    }

    #[test]
    fn file_sink_reports_unwritable_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::new(dir.path().join("missing").join("out"));
        let err = sink.append("x").unwrap_err();
        assert!(matches!(err, GateError::OutputSink { .. }), "{err:?}");
    }
}
