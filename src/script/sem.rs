//! Script bank files (`.sem`).
//!
//! Layout, all big-endian: eight zero bytes, the bank count, a table of each
//! bank's first script index (one extra entry closes the last bank), a table of
//! script data offsets terminated by zero, then the script data.

use super::bank::Script;
use crate::{
    error::{Error, Result},
    io::{Reader, Writer},
};
use std::path::Path;
use tracing::{debug, trace};

const BANK_COUNT_OFFSET: usize = 8;

/// One group of scripts, usually paired with one sound bank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemBank {
    pub scripts: Vec<Script>,
}

pub fn script_name(index: usize) -> String {
    format!("script_{index:03}")
}

pub fn read(data: &[u8]) -> Result<Vec<SemBank>> {
    let mut r = Reader::big_endian(data);
    r.seek(BANK_COUNT_OFFSET)?;
    let bank_count = r.read_count()?;

    let mut first_scripts = Vec::with_capacity(bank_count.min(r.remaining() / 4) + 1);
    for _ in 0..=bank_count {
        first_scripts.push(r.read_count()?);
    }

    let script_count = first_scripts.last().copied().unwrap_or(0);
    if first_scripts.windows(2).any(|w| w[0] > w[1]) {
        return Err(Error::format("sem bank indices are not ascending"));
    }

    let mut offsets = Vec::with_capacity(script_count.min(r.remaining() / 4) + 1);
    for _ in 0..=script_count {
        offsets.push(r.read_u32()? as usize);
    }

    debug!(bank_count, script_count, "read sem tables");

    let mut banks = Vec::with_capacity(bank_count);
    for range in first_scripts.windows(2) {
        let mut scripts = Vec::with_capacity(range[1] - range[0]);
        for index in range[0]..range[1] {
            let start = offsets[index];
            let end = match offsets[index + 1] {
                0 => data.len(),
                end => end,
            };

            if end < start {
                return Err(Error::format(format!("script {index} ends at {end:#x} before it starts at {start:#x}")));
            }

            trace!(index, start, end, "sem script");
            scripts.push(Script::decompile(script_name(index), r.get_section(start, end - start)?)?);
        }

        banks.push(SemBank { scripts });
    }

    Ok(banks)
}

pub fn write(banks: &[SemBank]) -> Vec<u8> {
    let script_count: usize = banks.iter().map(|b| b.scripts.len()).sum();
    let compiled: Vec<Vec<u8>> = banks.iter().flat_map(|b| &b.scripts).map(Script::compile).collect();

    let mut w = Writer::big_endian();
    w.write_zeros(BANK_COUNT_OFFSET);
    w.write_i32(banks.len() as i32);

    let mut first = 0;
    for bank in banks {
        w.write_i32(first as i32);
        first += bank.scripts.len();
    }
    w.write_i32(first as i32);

    let mut offset = w.position() + 4 * (script_count + 1);
    for code in &compiled {
        w.write_u32(offset as u32);
        offset += code.len();
    }
    w.write_u32(0);

    for code in &compiled {
        w.write_bytes(code);
    }

    w.into_vec()
}

pub fn open(path: impl AsRef<Path>) -> Result<Vec<SemBank>> {
    read(&std::fs::read(path)?)
}

pub fn save(path: impl AsRef<Path>, banks: &[SemBank]) -> Result<()> {
    std::fs::write(path, write(banks))?;
    Ok(())
}
