use bitflags::bitflags;

use super::{FatError, FatResult, ENTRY_DELETED, ENTRY_E5_ESCAPE};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub(crate) struct NameStatus: u8 {
        /// Final segment of the path.
        const LAST = 0x04;
        /// `.` or `..` segment.
        const DOT = 0x20;
        /// Path named the origin directory itself.
        const NONAME = 0x80;
    }
}

/// Space-padded 8.3 name in directory form plus its status flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SfnBuf {
    pub(crate) name: [u8; 11],
    pub(crate) status: NameStatus,
}

impl SfnBuf {
    pub(crate) const fn empty() -> Self {
        Self {
            name: [b' '; 11],
            status: NameStatus::empty(),
        }
    }
}

pub(crate) fn is_separator(c: u8) -> bool {
    c == b'/' || c == b'\\'
}

fn is_forbidden(c: u8) -> bool {
    matches!(
        c,
        b'"' | b'*' | b'+' | b',' | b':' | b';' | b'<' | b'=' | b'>' | b'?' | b'[' | b']' | b'|'
            | 0x7F
    )
}

/// Splits off an optional `N:` drive prefix. Without a prefix the path
/// addresses drive 0.
pub(crate) fn split_drive(path: &str, volumes: usize) -> FatResult<(usize, &[u8])> {
    let bytes = path.as_bytes();
    let Some(colon) = bytes.iter().take_while(|&&c| c > b' ').position(|&c| c == b':') else {
        return Ok((0, bytes));
    };
    let prefix = &bytes[..colon];
    let drive = if !prefix.is_empty() && prefix.iter().all(u8::is_ascii_digit) {
        prefix.iter().try_fold(0usize, |n, &c| {
            n.checked_mul(10)?.checked_add(usize::from(c - b'0'))
        })
    } else {
        None
    };
    let drive = drive
        .filter(|&drive| drive < volumes)
        .ok_or(FatError::InvalidDrive)?;
    Ok((drive, &bytes[colon + 1..]))
}

/// Parses the path segment starting at `*pos` into `sfn`, upper-casing ASCII
/// letters, and advances `*pos` past the segment and any separators after it.
pub(crate) fn create_name(sfn: &mut SfnBuf, path: &[u8], pos: &mut usize) -> FatResult<()> {
    sfn.name = [b' '; 11];
    sfn.status = NameStatus::empty();
    let mut p = *pos;

    if path.get(p) == Some(&b'.') {
        let dots = path[p..].iter().take_while(|&&c| c == b'.').count();
        let end = path.get(p + dots).copied().unwrap_or(0);
        if dots <= 2 && (end == 0 || is_separator(end)) {
            sfn.name[..dots].fill(b'.');
            p += dots;
            sfn.status = NameStatus::DOT | finish(path, &mut p);
            *pos = p;
            return Ok(());
        }
        return Err(FatError::InvalidName);
    }

    let mut i = 0;
    let mut limit = 8;
    loop {
        let c = path.get(p).copied().unwrap_or(0);
        if c == 0 || is_separator(c) {
            break;
        }
        p += 1;
        if c <= b' ' || is_forbidden(c) {
            return Err(FatError::InvalidName);
        }
        if c == b'.' {
            if limit == 11 || i == 0 {
                return Err(FatError::InvalidName);
            }
            i = 8;
            limit = 11;
            continue;
        }
        if i >= limit {
            return Err(FatError::InvalidName);
        }
        sfn.name[i] = c.to_ascii_uppercase();
        i += 1;
    }
    if i == 0 {
        return Err(FatError::InvalidName);
    }
    if sfn.name[0] == ENTRY_DELETED {
        sfn.name[0] = ENTRY_E5_ESCAPE;
    }
    sfn.status = finish(path, &mut p);
    *pos = p;
    Ok(())
}

fn finish(path: &[u8], p: &mut usize) -> NameStatus {
    while path.get(*p).is_some_and(|&c| is_separator(c)) {
        *p += 1;
    }
    if *p >= path.len() {
        NameStatus::LAST
    } else {
        NameStatus::empty()
    }
}

/// Converts a directory-form name back to `NAME.EXT`.
pub(crate) fn sfn_to_display(raw: &[u8]) -> heapless::Vec<u8, 12> {
    let mut out = heapless::Vec::new();
    for (i, &c) in raw[..11].iter().enumerate() {
        if c == b' ' {
            continue;
        }
        if i == 8 || (i > 8 && !out.contains(&b'.')) {
            let _ = out.push(b'.');
        }
        let c = if i == 0 && c == ENTRY_E5_ESCAPE { ENTRY_DELETED } else { c };
        let _ = out.push(c);
    }
    out
}
