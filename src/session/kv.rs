use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};

use log::error;

pub type KeyValues = HashMap<String, String>;

/// Parses `key: value` lines. Unknown keys are kept, a malformed line fails the whole read.
pub fn read(input: impl Read) -> io::Result<KeyValues> {
    let mut kv = HashMap::new();

    for line in BufReader::new(input).lines() {
        let line = line?;

        let (k, v) = line.split_once(':').ok_or_else(|| {
            error!("invalid session line, can't split");
            io::Error::from(io::ErrorKind::InvalidData)
        })?;

        let Some(v) = v.strip_prefix(' ') else {
            error!("invalid session line - no whitespace after colon");
            return Err(io::ErrorKind::InvalidData.into());
        };
        kv.insert(k.into(), v.into());
    }

    Ok(kv)
}

pub fn write(mut output: impl Write, keyvalues: &KeyValues) -> io::Result<()> {
    for (k, v) in keyvalues {
        writeln!(output, "{}: {}", k, v)?;
    }
    Ok(())
}
