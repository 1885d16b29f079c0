//! Redo replay. Each committed mini-transaction is a group of records; a
//! record is applied to its page only when the page has not already seen
//! the group, judged by the page LSN.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::storage::base::{Lsn, PageId, FIL_PAGE_LSN, UNIV_PAGE_SIZE};
use crate::storage::buffer::BufferPool;
use crate::storage::mach;
use crate::storage::mlog::{self, FieldWrite, MlogType};
use crate::storage::wal::{LogGroup, WalFile};
use crate::undo::layout::UndoOp;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecBody {
    Field(FieldWrite),
    Undo(UndoOp),
    InitFilePage,
}

/// One parsed redo record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRec {
    pub page: PageId,
    pub body: RecBody,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub groups: usize,
    pub applied: usize,
    pub skipped: usize,
    /// Log ended inside a record
    pub truncated: bool,
    pub end_lsn: Lsn,
}

/// Parse the record at the start of `buf`.
/// `Ok(None)` means `buf` ends inside the record.
pub fn parse_log_rec(buf: &[u8]) -> Result<Option<(LogRec, usize)>> {
    let Some((raw_type, page, n)) = mlog::parse_initial_record(buf) else {
        return Ok(None);
    };
    let ty = MlogType::from_u8(raw_type)
        .ok_or_else(|| Error::CorruptLog(format!("unknown redo record type {}", raw_type)))?;
    let rest = &buf[n..];

    let parsed = if ty.is_nbytes() {
        FieldWrite::parse(ty, rest)
            .map(|(w, m)| {
                let width = match ty {
                    MlogType::OneByte => 1,
                    MlogType::TwoBytes => 2,
                    MlogType::FourBytes => 4,
                    _ => 8,
                };
                if w.offset as usize + width > UNIV_PAGE_SIZE {
                    return Err(Error::CorruptLog(format!("field write past page end at {}", w.offset)));
                }
                Ok((RecBody::Field(w), m))
            })
            .transpose()?
    } else if ty == MlogType::InitFilePage {
        Some((RecBody::InitFilePage, 0))
    } else {
        UndoOp::parse(ty, rest)?.map(|(op, m)| (RecBody::Undo(op), m))
    };

    Ok(parsed.map(|(body, m)| (LogRec { page, body }, n + m)))
}

/// Apply a parsed record. With no page the record is only consumed.
pub fn apply_log_rec(rec: &LogRec, page: Option<&mut [u8]>) {
    let Some(frame) = page else {
        return;
    };
    match &rec.body {
        RecBody::Field(w) => w.apply(frame),
        RecBody::Undo(op) => {
            op.apply(frame);
        }
        RecBody::InitFilePage => mlog::init_file_page(frame, rec.page),
    }
}

/// Parse every record of a group; `None` if the group is cut short
fn parse_group(group: &LogGroup) -> Result<Option<Vec<LogRec>>> {
    let mut recs = Vec::new();
    let mut pos = 0;
    while pos < group.recs.len() {
        match parse_log_rec(&group.recs[pos..])? {
            Some((rec, n)) => {
                recs.push(rec);
                pos += n;
            }
            None => return Ok(None),
        }
    }
    Ok(Some(recs))
}

/// Replay `groups` into `pool`
pub fn recover(pool: &dyn BufferPool, groups: &[LogGroup]) -> Result<RecoveryStats> {
    recover_filtered(pool, groups, |_| true)
}

/// Replay `groups`, applying only records for pages accepted by `wanted`
pub fn recover_filtered<F>(pool: &dyn BufferPool, groups: &[LogGroup], wanted: F) -> Result<RecoveryStats>
where
    F: Fn(PageId) -> bool,
{
    let mut stats = RecoveryStats::default();
    for group in groups {
        let Some(recs) = parse_group(group)? else {
            warn!(end_lsn = group.end_lsn, "redo log ends inside a record, stopping recovery");
            stats.truncated = true;
            break;
        };

        let mut touched: Vec<PageId> = Vec::new();
        for rec in &recs {
            if !wanted(rec.page) {
                apply_log_rec(rec, None);
                stats.skipped += 1;
                continue;
            }
            let frame = pool.get(rec.page)?;
            let mut frame = frame.write();
            if mach::read_8(&frame, FIL_PAGE_LSN) >= group.end_lsn {
                stats.skipped += 1;
                continue;
            }
            apply_log_rec(rec, Some(&mut frame[..]));
            if !touched.contains(&rec.page) {
                touched.push(rec.page);
            }
            stats.applied += 1;
        }

        for page in touched {
            let frame = pool.get(page)?;
            mach::write_8(&mut frame.write(), FIL_PAGE_LSN, group.end_lsn);
        }
        stats.groups += 1;
        stats.end_lsn = group.end_lsn;
        debug!(end_lsn = group.end_lsn, n_recs = recs.len(), "replayed redo group");
    }
    info!(
        groups = stats.groups,
        applied = stats.applied,
        skipped = stats.skipped,
        end_lsn = stats.end_lsn,
        "redo replay finished"
    );
    Ok(stats)
}

/// Replay every valid entry of the redo file at `path`
pub fn recover_wal<P: AsRef<Path>>(path: P, pool: &dyn BufferPool) -> Result<RecoveryStats> {
    let wal = WalFile::open(path)?;
    let groups = wal
        .iter_from(0)
        .map(|entry| entry.map(|e| e.into_group()))
        .collect::<Result<Vec<_>>>()?;
    info!(path = %wal.path().display(), n_groups = groups.len(), "replaying redo file");
    recover(pool, &groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::buffer::MemBufferPool;
    use crate::storage::mtr::Mtr;
    use crate::storage::wal::MemLog;

    #[test]
    fn test_parse_consumes_whole_record() {
        let pool = MemBufferPool::new();
        let log = MemLog::new();
        let page = PageId::new(0, 4);
        let mut mtr = Mtr::start(&pool, &log);
        mtr.x_latch(page).unwrap();
        mtr.write_u64(page, 200, 0xDEAD_BEEF_0000_0001);
        mtr.write_ulint(page, 300, 9, MlogType::OneByte);
        mtr.commit().unwrap();

        let group = &log.groups()[0];
        let (first, n) = parse_log_rec(&group.recs).unwrap().unwrap();
        assert_eq!(first.page, page);
        apply_log_rec(&first, None);
        let (second, m) = parse_log_rec(&group.recs[n..]).unwrap().unwrap();
        assert_eq!(n + m, group.recs.len());
        assert!(matches!(second.body, RecBody::Field(FieldWrite { ty: MlogType::OneByte, .. })));
    }

    #[test]
    fn test_truncated_record_is_none() {
        let mut buf = Vec::new();
        mlog::write_initial_record(&mut buf, MlogType::UndoInsert, PageId::new(0, 2));
        buf.extend_from_slice(&[0, 10, 1, 2]);
        assert_eq!(parse_log_rec(&buf).unwrap(), None);
    }

    #[test]
    fn test_unknown_type_is_corrupt() {
        let buf = [0x55, 0, 1];
        assert!(matches!(parse_log_rec(&buf), Err(Error::CorruptLog(_))));
    }

    #[test]
    fn test_replay_is_idempotent() {
        let pool = MemBufferPool::new();
        let log = MemLog::new();
        let page = PageId::new(0, 9);
        let mut mtr = Mtr::start(&pool, &log);
        mtr.x_latch(page).unwrap();
        mtr.write_ulint(page, 100, 77, MlogType::FourBytes);
        mtr.commit().unwrap();

        let replay = MemBufferPool::new();
        let groups = log.groups();
        let first = recover(&replay, &groups).unwrap();
        assert_eq!(first.applied, 1);
        let second = recover(&replay, &groups).unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(replay.snapshot(page), pool.snapshot(page));
    }

    #[test]
    fn test_cut_group_stops_replay() {
        let pool = MemBufferPool::new();
        let log = MemLog::new();
        let page = PageId::new(0, 6);
        for (n, offset) in [100, 200, 300].into_iter().enumerate() {
            let mut mtr = Mtr::start(&pool, &log);
            mtr.x_latch(page).unwrap();
            mtr.write_ulint(page, offset, n as u32 + 1, MlogType::FourBytes);
            mtr.commit().unwrap();
        }

        let mut groups = log.groups();
        assert_eq!(groups.len(), 3);
        groups[1].recs.pop();

        let replay = MemBufferPool::new();
        let stats = recover(&replay, &groups).unwrap();
        assert!(stats.truncated);
        assert_eq!(stats.groups, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.end_lsn, groups[0].end_lsn);

        let frame = replay.snapshot(page).unwrap();
        assert_eq!(mach::read_4(&frame, 100), 1);
        assert_eq!(mach::read_4(&frame, 200), 0);
        assert_eq!(mach::read_4(&frame, 300), 0);
        assert_eq!(mach::read_8(&frame, FIL_PAGE_LSN), groups[0].end_lsn);
    }
}
