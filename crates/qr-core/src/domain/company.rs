use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::codec::{read_str, write_str, Decode, Encode};
use crate::domain::{compare, Equal};
use crate::error::{CodecError, Mismatch};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Company {
    pub code: String,
    pub name: String,
}

impl Company {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

impl Encode for Company {
    fn encode<W: Write>(&self, writer: &mut W) -> Result<(), CodecError> {
        write_str(writer, &self.code)?;
        write_str(writer, &self.name)
    }
}

impl Decode for Company {
    fn decode<R: Read>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            code: read_str(reader)?,
            name: read_str(reader)?,
        })
    }
}

impl Equal for Company {
    fn equal(&self, other: &Self) -> Result<(), Mismatch> {
        compare("code", &self.code, &other.code)?;
        compare("name", &self.name, &other.name)
    }
}
