// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Names of the OS objects backing one transport.
// A single base name fans out into the segment, the doorbell and one signal
// per buffer; every derived name is made platform-safe here.

/// FNV-1a 64-bit hash. Also used to fold textual layout tags into the
/// ring header.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// 32-bit fold of [`fnv1a_64`], the width stored in the ring header.
pub fn tag_hash(tag: &str) -> u32 {
    let h = fnv1a_64(tag.as_bytes());
    (h ^ (h >> 32)) as u32
}

fn to_hex(val: u64) -> [u8; 16] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 16];
    let mut v = val;
    for i in (0..16).rev() {
        buf[i] = DIGITS[(v & 0xf) as usize];
        v >>= 4;
    }
    buf
}

/// Longest OS object name accepted on this platform (leading '/' included).
/// Zero disables shortening.
///
/// macOS caps both `shm_open` and `sem_open` names at 31 bytes.
#[cfg(target_os = "macos")]
pub const OS_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const OS_NAME_MAX: usize = 0;

/// Produce an OS-safe object name with a leading '/'.
///
/// Names longer than [`OS_NAME_MAX`] become `/<prefix>_<16 hex digits>`,
/// where the digits are the FNV-1a hash of the full name and the prefix is
/// kept for debuggability.
pub fn make_os_name(name: &str) -> String {
    let result = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if OS_NAME_MAX == 0 || result.len() <= OS_NAME_MAX {
        return result;
    }

    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = OS_NAME_MAX.saturating_sub(HASH_SUFFIX_LEN + 1);

    let hex = to_hex(fnv1a_64(result.as_bytes()));

    let mut shortened = String::with_capacity(OS_NAME_MAX);
    shortened.push('/');
    let body = &result[1..];
    // Never split a UTF-8 sequence.
    let mut take = prefix_len.min(body.len());
    while !body.is_char_boundary(take) {
        take -= 1;
    }
    shortened.push_str(&body[..take]);
    shortened.push('_');
    shortened.extend(hex.iter().map(|&b| b as char));
    shortened
}

/// Name of the shared memory segment holding the ring.
pub fn segment_name(base: &str) -> String {
    format!("EV_RING__{base}")
}

/// Name of the ring-wide doorbell signal.
pub fn doorbell_name(base: &str) -> String {
    format!("EV_BELL__{base}")
}

/// Name of the dirty signal of buffer `index`.
pub fn buffer_signal_name(base: &str, index: usize) -> String {
    format!("EV_SIG{index}__{base}")
}
