//! Operator-facing text reports over a [`RegistrySnapshot`].

use std::cmp::Ordering;
use std::fmt::Write as _;

use tangle_types::{
    LockFilter, LockSnapshot, RegistrySnapshot, SortKey, ThreadFilter, ThreadId, ThreadSnapshot,
};

fn thread_label(snapshot: &RegistrySnapshot, id: ThreadId) -> String {
    match snapshot.thread(id) {
        Some(thread) => format!("{} ({})", thread.name, id),
        None => id.to_string(),
    }
}

/// `None` sorts after every `Some`.
fn cmp_present<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let mut text = String::new();
    for (cell, width) in cells.zip(widths) {
        let _ = write!(text, "{cell:<width$}  ", width = *width);
    }
    out.push_str(text.trim_end());
    out.push('\n');
}

fn render(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let mut out = String::new();
    push_row(&mut out, headers.iter().copied(), &widths);
    for row in rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

/// The "list locks" report.
pub fn list_locks(snapshot: &RegistrySnapshot, filter: LockFilter, sort: SortKey) -> String {
    let mut locks: Vec<&LockSnapshot> = snapshot
        .locks
        .iter()
        .filter(|lock| match filter {
            LockFilter::All => true,
            LockFilter::Held => lock.owner.is_some(),
            LockFilter::HeldBy(thread) => lock.owner.as_ref().is_some_and(|o| o.thread == thread),
        })
        .collect();

    locks.sort_by(|a, b| {
        let (ha, hb) = (a.owner.as_ref(), b.owner.as_ref());
        let primary = match sort {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Owner => cmp_present(ha.map(|h| h.thread), hb.map(|h| h.thread)),
            SortKey::Time => cmp_present(ha.map(|h| h.since_unix_ms), hb.map(|h| h.since_unix_ms)),
            SortKey::Site => cmp_present(ha.map(|h| &h.site), hb.map(|h| &h.site)),
        };
        primary.then(a.id.cmp(&b.id))
    });

    if locks.is_empty() {
        return "no locks\n".to_owned();
    }

    let rows: Vec<Vec<String>> = locks
        .iter()
        .map(|lock| {
            let (owner, held, site) = match &lock.owner {
                Some(hold) => (
                    thread_label(snapshot, hold.thread),
                    format!("{}ms", hold.held_ms),
                    hold.site.clone(),
                ),
                None => ("-".to_owned(), "-".to_owned(), "-".to_owned()),
            };
            vec![
                lock.id.to_string(),
                lock.name.clone(),
                format!("{:?}", lock.kind),
                owner,
                held,
                site,
                lock.waiters.len().to_string(),
            ]
        })
        .collect();

    render(
        &["ID", "NAME", "KIND", "OWNER", "HELD", "ACQUIRED AT", "WAITERS"],
        &rows,
    )
}

/// The "list threads" report.
pub fn list_threads(snapshot: &RegistrySnapshot, filter: ThreadFilter, sort: SortKey) -> String {
    let holder_of = |thread: &ThreadSnapshot| {
        let attempt = thread.awaiting.as_ref()?;
        Some(snapshot.lock(attempt.lock)?.owner.as_ref()?.thread)
    };

    let mut threads: Vec<&ThreadSnapshot> = snapshot
        .threads
        .iter()
        .filter(|thread| match filter {
            ThreadFilter::All => true,
            ThreadFilter::Waiting => thread.awaiting.is_some(),
            ThreadFilter::Only(id) => thread.id == id,
        })
        .collect();

    threads.sort_by(|a, b| {
        let (wa, wb) = (a.awaiting.as_ref(), b.awaiting.as_ref());
        let primary = match sort {
            SortKey::Name => a.name.cmp(&b.name),
            SortKey::Owner => cmp_present(holder_of(a), holder_of(b)),
            SortKey::Time => cmp_present(wa.map(|w| w.since_unix_ms), wb.map(|w| w.since_unix_ms)),
            SortKey::Site => cmp_present(wa.map(|w| &w.site), wb.map(|w| &w.site)),
        };
        primary.then(a.id.cmp(&b.id))
    });

    if threads.is_empty() {
        return "no threads\n".to_owned();
    }

    let rows: Vec<Vec<String>> = threads
        .iter()
        .map(|thread| {
            let (lock, holder, waited, site) = match &thread.awaiting {
                Some(attempt) => (
                    snapshot
                        .lock(attempt.lock)
                        .map(|l| format!("{} ({})", l.name, l.id))
                        .unwrap_or_else(|| attempt.lock.to_string()),
                    holder_of(thread)
                        .map(|h| thread_label(snapshot, h))
                        .unwrap_or_else(|| "-".to_owned()),
                    format!("{}ms", attempt.waiting_ms),
                    attempt.site.clone(),
                ),
                None => (
                    "-".to_owned(),
                    "-".to_owned(),
                    "-".to_owned(),
                    "-".to_owned(),
                ),
            };
            vec![
                thread.id.to_string(),
                thread.name.clone(),
                lock,
                holder,
                waited,
                site,
                thread.created_site.clone(),
            ]
        })
        .collect();

    render(
        &["ID", "NAME", "WAITING ON", "HOLDER", "WAITED", "WAIT SITE", "CREATED AT"],
        &rows,
    )
}
