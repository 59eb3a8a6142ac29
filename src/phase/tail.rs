use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Last `n` lines of a log file, lossily decoded
pub fn tail_lines(path: &Path, n: usize) -> io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut window = VecDeque::with_capacity(n.min(1024));
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if n == 0 {
            continue;
        }
        if window.len() == n {
            window.pop_front();
        }
        let text = String::from_utf8_lossy(&line);
        window.push_back(text.trim_end_matches(['\n', '\r']).to_string());
    }

    Ok(window.into_iter().collect())
}

/// First `n` lines of a file, each cut to at most `max_bytes`
pub fn head_lines(path: &Path, n: usize, max_bytes: usize) -> io::Result<Vec<String>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut lines = Vec::new();
    let mut line = Vec::new();

    while lines.len() < n {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        line.truncate(max_bytes);
        lines.push(String::from_utf8_lossy(&line).into_owned());
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_last_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phase.log");
        let content: String = (1..=200).map(|i| format!("line {}\n", i)).collect();
        std::fs::write(&path, content).unwrap();

        let tail = tail_lines(&path, 80).unwrap();
        assert_eq!(tail.len(), 80);
        assert_eq!(tail.first().unwrap(), "line 121");
        assert_eq!(tail.last().unwrap(), "line 200");
    }

    #[test]
    fn short_file_is_returned_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.log");
        std::fs::write(&path, "a\nb").unwrap();
        assert_eq!(tail_lines(&path, 50).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn head_cuts_long_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.json");
        std::fs::write(&path, format!("{}\n2\n3\n4\n5\n6\n", "x".repeat(2000))).unwrap();

        let head = head_lines(&path, 5, 512).unwrap();
        assert_eq!(head.len(), 5);
        assert_eq!(head[0].len(), 512);
        assert_eq!(head[4], "5");
    }
}
