//! Process-tree termination.
//!
//! Kills every descendant of a task's child process without leaving orphans.
//! Descendants are discovered by walking `/proc` parent links; signalling
//! happens per process group, bracketed by SIGSTOP/SIGCONT so nothing in the
//! tree can fork between discovery and delivery.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;

use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::Result;

/// One row of the process table, as read from `/proc`.
#[derive(Debug, Clone)]
struct ProcessRecord {
    pid: i32,
    ppid: i32,
    pgid: i32,
    name: String,
}

/// Sends `signal` to every process group in the tree rooted at `root`.
///
/// The order of signalling within the tree is undefined.
pub fn kill_tree(signal: Signal, root: Pid) -> Result<()> {
    let pgids = process_groups_in_tree(root)?;
    let signals = wrap_with_stop_and_cont(signal);
    signal_process_groups(&signals, &pgids);
    Ok(())
}

/// Like [`kill_tree`], but spares processes whose name matches one of
/// `excludes` (case-insensitive). Exclusion requires signalling individual
/// pids instead of whole groups.
pub fn kill_tree_with_excludes(signal: Signal, root: Pid, excludes: &[String]) -> Result<()> {
    info!(signal = %signal, root = %root, "Sending signal to process tree");
    if excludes.is_empty() {
        return kill_tree(signal, root);
    }

    let table = process_table()?;
    let pgids = groups_of_tree(&table, root);
    debug!(?pgids, "Found process groups");

    let retained: Vec<i32> = table
        .values()
        .filter(|record| pgids.contains(&record.pgid))
        .filter(|record| {
            let excluded = excludes
                .iter()
                .any(|name| name.eq_ignore_ascii_case(&record.name));
            if excluded {
                info!(name = %record.name, pid = record.pid, "Excluding process from kill");
            }
            !excluded
        })
        .map(|record| record.pid)
        .collect();
    debug!(?retained, "Processes to signal");

    let signals = wrap_with_stop_and_cont(signal);
    for signal in &signals {
        for pid in &retained {
            debug!(signal = %signal, pid, "Sending signal to pid");
            if let Err(err) = kill(Pid::from_raw(*pid), *signal) {
                info!(pid, error = %err, "Error sending signal to pid");
            }
        }
    }
    Ok(())
}

/// Collects the process-group ids reachable from `root` through parent
/// links, deduplicated, with the executor's own group excluded.
pub fn process_groups_in_tree(root: Pid) -> io::Result<Vec<i32>> {
    let table = process_table()?;
    if !table.contains_key(&root.as_raw()) {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("process {root} not found"),
        ));
    }
    Ok(groups_of_tree(&table, root).into_iter().collect())
}

fn groups_of_tree(table: &HashMap<i32, ProcessRecord>, root: Pid) -> HashSet<i32> {
    let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
    for record in table.values() {
        children.entry(record.ppid).or_default().push(record.pid);
    }

    let own_pgid = nix::unistd::getpgrp().as_raw();
    let mut pgids = HashSet::new();
    let mut queue = VecDeque::from([root.as_raw()]);
    let mut seen = HashSet::new();
    while let Some(pid) = queue.pop_front() {
        if !seen.insert(pid) {
            continue;
        }
        if let Some(record) = table.get(&pid) {
            if record.pgid != own_pgid {
                pgids.insert(record.pgid);
            }
        }
        if let Some(child_pids) = children.get(&pid) {
            queue.extend(child_pids);
        }
    }
    pgids
}

/// Wraps the signal with SIGSTOP and SIGCONT so stopped processes cannot
/// fork while the tree is being signalled. There is no point in a SIGCONT
/// after SIGKILL.
fn wrap_with_stop_and_cont(signal: Signal) -> Vec<Signal> {
    let mut signals = vec![Signal::SIGSTOP, signal];
    if signal != Signal::SIGKILL {
        signals.push(Signal::SIGCONT);
    }
    signals
}

fn signal_process_groups(signals: &[Signal], pgids: &[i32]) {
    for signal in signals {
        for pgid in pgids {
            info!(signal = %signal, pgid, "Sending signal to process group");
            if let Err(err) = killpg(Pid::from_raw(*pgid), *signal) {
                info!(pgid, error = %err, "Error sending signal to process group");
            }
        }
    }
}

fn process_table() -> io::Result<HashMap<i32, ProcessRecord>> {
    let mut table = HashMap::new();
    for entry in std::fs::read_dir("/proc")? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        else {
            continue;
        };
        // Processes can vanish between readdir and the stat read.
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        match parse_stat(pid, &stat) {
            Some(record) => {
                table.insert(pid, record);
            }
            None => warn!(pid, "Unparseable /proc stat entry"),
        }
    }
    Ok(table)
}

/// Parses a `/proc/<pid>/stat` line. The command name is wrapped in
/// parentheses and may itself contain spaces or parentheses, so fields are
/// located relative to the last closing one.
fn parse_stat(pid: i32, stat: &str) -> Option<ProcessRecord> {
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let name = stat.get(open + 1..close)?.to_string();
    let mut fields = stat.get(close + 1..)?.split_ascii_whitespace();
    let _state = fields.next()?;
    let ppid = fields.next()?.parse().ok()?;
    let pgid = fields.next()?.parse().ok()?;
    Some(ProcessRecord {
        pid,
        ppid,
        pgid,
        name,
    })
}
