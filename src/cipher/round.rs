//! Substitution/rotation cipher applied after the keystream on send and
//! undone first on receive.
//!
//! Three rounds of two passes each. Encode and decode are separate inverse
//! algorithms; rotation amounts are taken modulo 8.

const ROUNDS: usize = 3;

/// Encrypt `data` in place.
pub fn encrypt(data: &mut [u8]) {
    let size = data.len();
    for _ in 0..ROUNDS {
        let mut acc = 0u8;
        for j in (1..=size).rev() {
            let idx = size - j;
            let len = j as u8;
            let mut c = data[idx].rotate_left(3);
            c = c.wrapping_add(len);
            c ^= acc;
            acc = c;
            c = acc.rotate_right(j as u32 % 8);
            c ^= 0xFF;
            data[idx] = c.wrapping_add(0x48);
        }

        acc = 0;
        for j in (1..=size).rev() {
            let idx = j - 1;
            let len = j as u8;
            let mut c = data[idx].rotate_left(4);
            c = c.wrapping_add(len);
            c ^= acc;
            acc = c;
            c ^= 0x13;
            data[idx] = c.rotate_right(3);
        }
    }
}

/// Decrypt `data` in place.
pub fn decrypt(data: &mut [u8]) {
    let size = data.len();
    for _ in 0..ROUNDS {
        // Each pass needs the pre-XOR value of the previous byte, hence two
        // accumulators.
        let mut prev = 0u8;
        for j in (1..=size).rev() {
            let idx = j - 1;
            let len = j as u8;
            let mut c = data[idx].rotate_left(3);
            c ^= 0x13;
            let cur = c;
            c ^= prev;
            c = c.wrapping_sub(len);
            data[idx] = c.rotate_right(4);
            prev = cur;
        }

        prev = 0;
        for j in (1..=size).rev() {
            let idx = size - j;
            let len = j as u8;
            let mut c = data[idx].wrapping_sub(0x48);
            c ^= 0xFF;
            c = c.rotate_left(j as u32 % 8);
            let cur = c;
            c ^= prev;
            c = c.wrapping_sub(len);
            data[idx] = c.rotate_right(3);
            prev = cur;
        }
    }
}
