/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Call data codec. A call is written as `function@hexarg@hexarg...`.

use crate::error::AsyncError;

pub const ARGUMENT_SEPARATOR: u8 = b'@';

/// Splits call data into the function name and its decoded arguments.
pub fn parse_call_data(data: &[u8]) -> Result<(String, Vec<Vec<u8>>), AsyncError> {
    let mut tokens = data.split(|byte| *byte == ARGUMENT_SEPARATOR);

    let function = tokens
        .next()
        .filter(|function| !function.is_empty())
        .ok_or_else(|| AsyncError::InvalidCallData("missing function name".to_string()))?;
    let function = String::from_utf8(function.to_vec())
        .map_err(|_| AsyncError::InvalidCallData("function name is not utf-8".to_string()))?;

    let arguments = tokens
        .map(|token| {
            hex::decode(token).map_err(|e| AsyncError::InvalidCallData(e.to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((function, arguments))
}

/// Builds call data in the format read by [parse_call_data].
#[derive(Clone, Debug)]
pub struct CallDataBuilder {
    data: Vec<u8>,
}

impl CallDataBuilder {
    pub fn new(function: &str) -> Self {
        Self {
            data: function.as_bytes().to_vec(),
        }
    }

    pub fn argument(mut self, argument: &[u8]) -> Self {
        self.data.push(ARGUMENT_SEPARATOR);
        self.data.extend_from_slice(hex::encode(argument).as_bytes());
        self
    }

    pub fn arguments<'a>(self, arguments: impl IntoIterator<Item = &'a Vec<u8>>) -> Self {
        arguments
            .into_iter()
            .fold(self, |builder, argument| builder.argument(argument))
    }

    pub fn build(self) -> Vec<u8> {
        self.data
    }
}
