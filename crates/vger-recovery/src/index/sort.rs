//! Ordinal line sorting for index files.
//!
//! The fast path loads the whole file and sorts it in memory. When the
//! buffers cannot be allocated it falls back to an external natural merge
//! sort over two scratch files, repeating distribute/merge passes until a
//! pass finds a single run. Both produce the same byte order.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::cancel::Cancellation;
use crate::error::Result;

/// Why the in-memory sort could not run.
#[derive(Debug)]
pub enum SortError {
    /// Buffers for the file could not be reserved.
    OutOfMemory,
    Io(io::Error),
}

impl From<io::Error> for SortError {
    fn from(e: io::Error) -> Self {
        SortError::Io(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortStrategy {
    InMemory,
    External,
}

/// Sort the lines of `src` into `dst` (which may equal `src`).
pub fn sort_file(src: &Path, dst: &Path, cancel: &dyn Cancellation) -> Result<SortStrategy> {
    match sort_in_memory(src, dst) {
        Ok(()) => Ok(SortStrategy::InMemory),
        Err(SortError::OutOfMemory) => {
            warn!(file = %src.display(), "not enough memory to sort in place, using external sort");
            external_sort(src, dst, cancel)?;
            Ok(SortStrategy::External)
        }
        Err(SortError::Io(e)) => Err(e.into()),
    }
}

pub fn sort_in_memory(src: &Path, dst: &Path) -> std::result::Result<(), SortError> {
    let mut file = File::open(src)?;
    let len = file.metadata()?.len() as usize;

    let mut content = String::new();
    content
        .try_reserve_exact(len)
        .map_err(|_| SortError::OutOfMemory)?;
    file.read_to_string(&mut content)?;
    drop(file);

    let mut lines: Vec<&str> = Vec::new();
    let estimate = content.bytes().filter(|&b| b == b'\n').count() + 1;
    lines
        .try_reserve_exact(estimate)
        .map_err(|_| SortError::OutOfMemory)?;
    lines.extend(content.lines());
    // `str` ordering is byte-wise, which is the ordinal order the index needs.
    lines.sort();

    let tmp = scratch_file(dst)?;
    let mut out = BufWriter::new(tmp.as_file());
    for line in &lines {
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    drop(out);
    tmp.persist(dst).map_err(|e| SortError::Io(e.error))?;
    Ok(())
}

/// External natural merge sort using two scratch files.
pub fn external_sort(src: &Path, dst: &Path, cancel: &dyn Cancellation) -> Result<()> {
    let dir = parent_dir(dst);
    let work = tempfile::NamedTempFile::new_in(dir)?;
    let run_a = tempfile::NamedTempFile::new_in(dir)?;
    let run_b = tempfile::NamedTempFile::new_in(dir)?;

    // Normalize into the work file (every line newline-terminated).
    {
        let mut reader = BufReader::new(File::open(src)?);
        let mut out = BufWriter::new(File::create(work.path())?);
        while let Some(line) = next_line(&mut reader)? {
            writeln!(out, "{line}")?;
        }
        out.flush()?;
    }

    let mut passes = 0u32;
    loop {
        cancel.check()?;
        let runs = distribute(work.path(), run_a.path(), run_b.path())?;
        passes += 1;
        if runs <= 1 {
            break;
        }
        merge_runs(run_a.path(), run_b.path(), work.path())?;
    }
    debug!(passes, "external sort complete");

    work.persist(dst).map_err(|e| e.error)?;
    Ok(())
}

/// Merge two sorted files into `dst`, dropping exact duplicate lines.
/// Returns the number of lines written.
pub fn merge_sorted(a: &Path, b: &Path, dst: &Path) -> Result<u64> {
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let tmp = scratch_file(dst)?;
    let mut out = BufWriter::new(tmp.as_file());

    let mut la = next_line(&mut ra)?;
    let mut lb = next_line(&mut rb)?;
    let mut last: Option<String> = None;
    let mut written = 0u64;
    loop {
        let take_a = match (&la, &lb) {
            (None, None) => break,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(x), Some(y)) => x <= y,
        };
        let line = if take_a {
            std::mem::replace(&mut la, next_line(&mut ra)?)
        } else {
            std::mem::replace(&mut lb, next_line(&mut rb)?)
        };
        let Some(line) = line else { break };
        if last.as_deref() != Some(line.as_str()) {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
            written += 1;
            last = Some(line);
        }
    }
    out.flush()?;
    drop(out);
    tmp.persist(dst).map_err(|e| e.error)?;
    Ok(written)
}

/// Split `src` into ascending runs, alternating between `a` and `b`.
/// Returns the number of runs found.
fn distribute(src: &Path, a: &Path, b: &Path) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut out_a = BufWriter::new(File::create(a)?);
    let mut out_b = BufWriter::new(File::create(b)?);
    let mut prev: Option<String> = None;
    let mut to_a = true;
    let mut runs = 0u64;

    while let Some(line) = next_line(&mut reader)? {
        match &prev {
            None => runs = 1,
            Some(p) if line.as_str() < p.as_str() => {
                runs += 1;
                to_a = !to_a;
            }
            Some(_) => {}
        }
        let out = if to_a { &mut out_a } else { &mut out_b };
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        prev = Some(line);
    }
    out_a.flush()?;
    out_b.flush()?;
    Ok(runs)
}

/// Reads one file as a sequence of ascending runs.
struct RunCursor<R: BufRead> {
    reader: R,
    head: Option<String>,
    run_open: bool,
}

impl<R: BufRead> RunCursor<R> {
    fn new(mut reader: R) -> io::Result<Self> {
        let head = next_line(&mut reader)?;
        Ok(Self {
            reader,
            run_open: head.is_some(),
            head,
        })
    }

    fn start_next_run(&mut self) {
        self.run_open = self.head.is_some();
    }

    fn take(&mut self) -> io::Result<Option<String>> {
        let Some(line) = self.head.take() else {
            self.run_open = false;
            return Ok(None);
        };
        self.head = next_line(&mut self.reader)?;
        self.run_open = matches!(&self.head, Some(next) if next.as_str() >= line.as_str());
        Ok(Some(line))
    }
}

fn merge_runs(a: &Path, b: &Path, dst: &Path) -> io::Result<()> {
    let mut ca = RunCursor::new(BufReader::new(File::open(a)?))?;
    let mut cb = RunCursor::new(BufReader::new(File::open(b)?))?;
    let mut out = BufWriter::new(File::create(dst)?);

    loop {
        ca.start_next_run();
        cb.start_next_run();
        if !ca.run_open && !cb.run_open {
            break;
        }
        while ca.run_open && cb.run_open {
            let from_a = ca.head <= cb.head;
            let cursor = if from_a { &mut ca } else { &mut cb };
            if let Some(line) = cursor.take()? {
                writeln!(out, "{line}")?;
            }
        }
        for cursor in [&mut ca, &mut cb] {
            while cursor.run_open {
                if let Some(line) = cursor.take()? {
                    writeln!(out, "{line}")?;
                }
            }
        }
    }
    out.flush()
}

/// Next line without its terminator; `None` at end of file.
pub(crate) fn next_line(reader: &mut impl BufRead) -> io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn scratch_file(dst: &Path) -> io::Result<tempfile::NamedTempFile> {
    tempfile::NamedTempFile::new_in(parent_dir(dst))
}
