/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Parser of the arguments of built-in token transfer functions.
//!
//! A token transfer may carry a contract call, written after the transfer arguments:
//!
//! ```text
//! ESDTTransfer         @token @value                       [@function @args...]
//! ESDTNFTTransfer      @token @nonce @value @destination   [@function @args...]
//! MultiESDTNFTTransfer @destination @count (@token @nonce @value)*count [@function @args...]
//! ```

use crate::{
    codec::u64_from_be_bytes,
    error::AsyncError,
    types::{EsdtTransfer, PublicAddress},
};

pub const ESDT_TRANSFER: &str = "ESDTTransfer";
pub const ESDT_NFT_TRANSFER: &str = "ESDTNFTTransfer";
pub const MULTI_ESDT_NFT_TRANSFER: &str = "MultiESDTNFTTransfer";

/// Transfers and trailing call extracted from the arguments of a built-in transfer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedEsdtTransfers {
    pub esdt_transfers: Vec<EsdtTransfer>,
    /// Account that actually receives the tokens.
    pub receiver: PublicAddress,
    /// Function called on the receiver after the transfer. Empty for a plain transfer.
    pub call_function: String,
    pub call_args: Vec<Vec<u8>>,
}

pub trait EsdtTransferParser {
    fn parse_esdt_transfers(
        &self,
        sender: &PublicAddress,
        receiver: &PublicAddress,
        function: &str,
        arguments: &[Vec<u8>],
    ) -> Result<ParsedEsdtTransfers, AsyncError>;
}

/// Parser for the three built-in transfer functions.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinEsdtTransferParser;

impl EsdtTransferParser for BuiltinEsdtTransferParser {
    fn parse_esdt_transfers(
        &self,
        sender: &PublicAddress,
        receiver: &PublicAddress,
        function: &str,
        arguments: &[Vec<u8>],
    ) -> Result<ParsedEsdtTransfers, AsyncError> {
        // A transfer sent to oneself names the real receiver in its arguments.
        let is_self_transfer = sender == receiver;

        match function {
            ESDT_TRANSFER => {
                let [token, value, rest @ ..] = arguments else {
                    return Err(invalid("ESDTTransfer needs a token and a value"));
                };
                let transfer = EsdtTransfer {
                    token_identifier: token.clone(),
                    nonce: 0,
                    value: number(value)?,
                };
                with_call(vec![transfer], *receiver, rest)
            }
            ESDT_NFT_TRANSFER => {
                let [token, nonce, value, destination, rest @ ..] = arguments else {
                    return Err(invalid("ESDTNFTTransfer needs a token, a nonce, a value and a destination"));
                };
                let transfer = EsdtTransfer {
                    token_identifier: token.clone(),
                    nonce: number(nonce)?,
                    value: number(value)?,
                };
                let receiver = if is_self_transfer {
                    address(destination)?
                } else {
                    *receiver
                };
                with_call(vec![transfer], receiver, rest)
            }
            MULTI_ESDT_NFT_TRANSFER => {
                let [destination, count, rest @ ..] = arguments else {
                    return Err(invalid("MultiESDTNFTTransfer needs a destination and a count"));
                };
                let count = usize::try_from(number(count)?)
                    .map_err(|_| invalid("transfer count out of range"))?;
                let triples_len = count
                    .checked_mul(3)
                    .filter(|len| *len <= rest.len())
                    .ok_or_else(|| invalid("missing transfer arguments"))?;
                let (triples, rest) = rest.split_at(triples_len);
                let transfers = triples
                    .chunks(3)
                    .map(|triple| {
                        Ok(EsdtTransfer {
                            token_identifier: triple[0].clone(),
                            nonce: number(&triple[1])?,
                            value: number(&triple[2])?,
                        })
                    })
                    .collect::<Result<Vec<_>, AsyncError>>()?;
                let receiver = if is_self_transfer {
                    address(destination)?
                } else {
                    *receiver
                };
                with_call(transfers, receiver, rest)
            }
            _ => Err(AsyncError::InvalidCallData(format!(
                "{function} is not a token transfer"
            ))),
        }
    }
}

fn with_call(
    esdt_transfers: Vec<EsdtTransfer>,
    receiver: PublicAddress,
    rest: &[Vec<u8>],
) -> Result<ParsedEsdtTransfers, AsyncError> {
    let (call_function, call_args) = match rest {
        [] => (String::new(), Vec::new()),
        [function, args @ ..] => (
            String::from_utf8(function.clone())
                .map_err(|_| invalid("called function is not utf-8"))?,
            args.to_vec(),
        ),
    };
    Ok(ParsedEsdtTransfers {
        esdt_transfers,
        receiver,
        call_function,
        call_args,
    })
}

fn number(bytes: &[u8]) -> Result<u64, AsyncError> {
    u64_from_be_bytes(bytes).ok_or_else(|| invalid("number does not fit in 64 bits"))
}

fn address(bytes: &[u8]) -> Result<PublicAddress, AsyncError> {
    bytes
        .try_into()
        .map_err(|_| invalid("destination is not a 32 byte address"))
}

fn invalid(message: &str) -> AsyncError {
    AsyncError::InvalidCallData(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: PublicAddress = [1u8; 32];
    const BOB: PublicAddress = [2u8; 32];

    #[test]
    fn test_fungible_transfer_with_call() {
        let arguments = vec![b"TKN-01".to_vec(), vec![0x03, 0xe8], b"deposit".to_vec(), vec![7]];
        let parsed = BuiltinEsdtTransferParser
            .parse_esdt_transfers(&ALICE, &BOB, ESDT_TRANSFER, &arguments)
            .unwrap();
        assert_eq!(parsed.receiver, BOB);
        assert_eq!(parsed.esdt_transfers.len(), 1);
        assert_eq!(parsed.esdt_transfers[0].value, 1000);
        assert!(parsed.esdt_transfers[0].is_fungible());
        assert_eq!(parsed.call_function, "deposit");
        assert_eq!(parsed.call_args, vec![vec![7]]);
    }

    #[test]
    fn test_nft_self_transfer_resolves_destination() {
        let arguments = vec![b"NFT-02".to_vec(), vec![5], vec![1], BOB.to_vec()];
        let parsed = BuiltinEsdtTransferParser
            .parse_esdt_transfers(&ALICE, &ALICE, ESDT_NFT_TRANSFER, &arguments)
            .unwrap();
        assert_eq!(parsed.receiver, BOB);
        assert_eq!(parsed.esdt_transfers[0].nonce, 5);
        assert!(parsed.call_function.is_empty());
    }

    #[test]
    fn test_multi_transfer() {
        let arguments = vec![
            BOB.to_vec(),
            vec![2],
            b"A".to_vec(),
            vec![],
            vec![10],
            b"B".to_vec(),
            vec![1],
            vec![20],
            b"claim".to_vec(),
        ];
        let parsed = BuiltinEsdtTransferParser
            .parse_esdt_transfers(&ALICE, &ALICE, MULTI_ESDT_NFT_TRANSFER, &arguments)
            .unwrap();
        assert_eq!(parsed.receiver, BOB);
        assert_eq!(parsed.esdt_transfers.len(), 2);
        assert_eq!(parsed.esdt_transfers[1].value, 20);
        assert_eq!(parsed.call_function, "claim");
    }

    #[test]
    fn test_rejects_short_arguments() {
        let parser = BuiltinEsdtTransferParser;
        assert!(parser
            .parse_esdt_transfers(&ALICE, &BOB, ESDT_TRANSFER, &[b"TKN".to_vec()])
            .is_err());
        assert!(parser
            .parse_esdt_transfers(&ALICE, &ALICE, MULTI_ESDT_NFT_TRANSFER, &[BOB.to_vec(), vec![2]])
            .is_err());
        assert!(parser
            .parse_esdt_transfers(&ALICE, &BOB, "transfer", &[])
            .is_err());
    }
}
