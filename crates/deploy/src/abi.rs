//! Calldata and role identifier encoding.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, keccak256},
};

/// Name of the role that administers every other role.
pub const DEFAULT_ADMIN_ROLE: &str = "DEFAULT_ADMIN_ROLE";

/// `grantRole(bytes32,address)`
pub const GRANT_ROLE_SIGNATURE: &str = "grantRole(bytes32,address)";

/// `hasRole(bytes32,address)`
pub const HAS_ROLE_SIGNATURE: &str = "hasRole(bytes32,address)";

/// `upgradeToAndCall(address,bytes)` on UUPS proxies.
pub const UPGRADE_TO_AND_CALL_SIGNATURE: &str = "upgradeToAndCall(address,bytes)";

/// 4-byte selector of a canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encode a call to `signature` with `args` in declaration order.
pub fn encode_call(signature: &str, args: &[DynSolValue]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(encode_args(args));
    Bytes::from(data)
}

/// ABI-encode `args` as a parameter list, without selector.
pub fn encode_args(args: &[DynSolValue]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }
    DynSolValue::Tuple(args.to_vec()).abi_encode_params()
}

/// On-chain identifier of a role.
///
/// The default admin role is the zero word, every other role is the keccak hash of
/// its name.
pub fn role_id(name: &str) -> B256 {
    if name == DEFAULT_ADMIN_ROLE {
        B256::ZERO
    } else {
        keccak256(name.as_bytes())
    }
}

/// Calldata for `grantRole(role, account)`.
pub fn grant_role_call(role: B256, account: Address) -> Bytes {
    encode_call(
        GRANT_ROLE_SIGNATURE,
        &[
            DynSolValue::FixedBytes(role, 32),
            DynSolValue::Address(account),
        ],
    )
}

/// Calldata for `hasRole(role, account)`.
pub fn has_role_call(role: B256, account: Address) -> Bytes {
    encode_call(
        HAS_ROLE_SIGNATURE,
        &[
            DynSolValue::FixedBytes(role, 32),
            DynSolValue::Address(account),
        ],
    )
}

/// Calldata for `upgradeToAndCall(implementation, data)`.
pub fn upgrade_to_and_call(implementation: Address, data: Bytes) -> Bytes {
    encode_call(
        UPGRADE_TO_AND_CALL_SIGNATURE,
        &[
            DynSolValue::Address(implementation),
            DynSolValue::Bytes(data.to_vec()),
        ],
    )
}

/// Decode a single ABI `bool` return value.
pub fn decode_bool(data: &[u8]) -> Option<bool> {
    if data.len() != 32 || data[..31].iter().any(|b| *b != 0) {
        return None;
    }
    match data[31] {
        0 => Some(false),
        1 => Some(true),
        _ => None,
    }
}
