use std::io;

use tokio::sync::mpsc;
use runvisor::exec::OutputLines;

/// Output that replays a fixed sequence of reads and then closes.
///
/// - `Ok(line)` is delivered as one output line
/// - `Err(e)` is delivered as a read failure
pub fn scripted_output(reads: Vec<io::Result<String>>) -> OutputLines {
    let (tx, rx) = mpsc::channel(reads.len().max(1));
    for read in reads {
        tx.try_send(read).expect("scripted output fits its channel");
    }
    OutputLines::from_channel(rx)
}

/// Shorthand for an output stream that fails with `kind` after `lines`.
pub fn failing_output(lines: &[&str], kind: io::ErrorKind) -> OutputLines {
    let mut reads: Vec<io::Result<String>> = lines.iter().map(|l| Ok(l.to_string())).collect();
    reads.push(Err(io::Error::new(kind, "simulated pipe failure")));
    scripted_output(reads)
}
