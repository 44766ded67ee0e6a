//! Bounds-checked little-endian readers for image structures.
//!
//! Every multi-byte value in the PE headers and the metadata tables is little-endian.
//! The readers here never panic: a read past the end of the buffer returns
//! [`crate::Error::OutOfBounds`], which the image reader turns into a bad-image failure.
//!
//! # Examples
//!
//! ```rust
//! use clrbind::file::io::{read_le, read_le_at};
//!
//! let data = [0x42, 0x53, 0x4A, 0x42, 0x01, 0x00];
//! assert_eq!(read_le::<u32>(&data)?, 0x424A_5342);
//!
//! let mut offset = 4;
//! assert_eq!(read_le_at::<u16>(&data, &mut offset)?, 1);
//! assert_eq!(offset, 6);
//! # Ok::<(), clrbind::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Primitive values that can be decoded from little-endian bytes.
pub trait LeIO: Sized {
    /// Byte array holding one encoded value
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]>;

    /// Decodes a value from its little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
}

macro_rules! impl_le_io {
    ($($ty:ty),*) => {
        $(
            impl LeIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }
            }
        )*
    };
}

impl_le_io!(u8, u16, u32, u64, i32);

/// Reads a value from the start of `data`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if `data` is shorter than the value.
pub fn read_le<T: LeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0;
    read_le_at(data, &mut offset)
}

/// Reads a value at `offset` and advances `offset` past it.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in `data`.
pub fn read_le_at<T: LeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };

    let Some(slice) = data.get(*offset..end) else {
        return Err(OutOfBounds);
    };

    let Ok(read) = slice.try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Reads a 2- or 4-byte index, as used by metadata table columns.
///
/// # Arguments
///
/// * `data` - Buffer to read from
/// * `offset` - Read position, advanced past the value
/// * `is_large` - `true` for a 4-byte column, `false` for a 2-byte column
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the value does not fit in `data`.
pub fn read_le_at_dyn(data: &[u8], offset: &mut usize, is_large: bool) -> Result<u32> {
    if is_large {
        read_le_at::<u32>(data, offset)
    } else {
        read_le_at::<u16>(data, offset).map(u32::from)
    }
}

/// Reads a NUL-terminated UTF-8 string starting at `offset`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] when no terminator is found and
/// [`crate::Error::Malformed`] when the bytes are not valid UTF-8.
pub fn read_cstr(data: &[u8], offset: usize) -> Result<&str> {
    let tail = data.get(offset..).ok_or(OutOfBounds)?;
    let Some(end) = tail.iter().position(|&b| b == 0) else {
        return Err(OutOfBounds);
    };

    std::str::from_utf8(&tail[..end])
        .map_err(|_| malformed_error!("Invalid UTF-8 string at offset {}", offset))
}

/// Reads an ECMA-335 compressed unsigned integer (1, 2 or 4 bytes, big-endian tagged).
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] on truncated input and
/// [`crate::Error::Malformed`] on an invalid length tag.
pub fn read_compressed_uint(data: &[u8], offset: &mut usize) -> Result<u32> {
    let first = read_le_at::<u8>(data, offset)?;

    if first & 0x80 == 0 {
        return Ok(u32::from(first));
    }

    if first & 0xC0 == 0x80 {
        let second = read_le_at::<u8>(data, offset)?;
        return Ok((u32::from(first & 0x3F) << 8) | u32::from(second));
    }

    if first & 0xE0 == 0xC0 {
        let mut value = u32::from(first & 0x1F);
        for _ in 0..3 {
            value = (value << 8) | u32::from(read_le_at::<u8>(data, offset)?);
        }
        return Ok(value);
    }

    Err(malformed_error!(
        "Invalid compressed integer prefix 0x{:02X}",
        first
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_le_u8() {
        let result = read_le::<u8>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x01);
    }

    #[test]
    fn read_le_u16() {
        let result = read_le::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0201);
    }

    #[test]
    fn read_le_u32() {
        let result = read_le::<u32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0403_0201);
    }

    #[test]
    fn read_le_u64() {
        let result = read_le::<u64>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0807_0605_0403_0201);
    }

    #[test]
    fn read_le_at_advances() {
        let mut offset = 2;
        assert_eq!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).unwrap(), 0x0403);
        assert_eq!(offset, 4);
        assert_eq!(read_le_at::<u32>(&TEST_BUFFER, &mut offset).unwrap(), 0x0807_0605);
        assert_eq!(offset, 8);
    }

    #[test]
    fn read_le_out_of_bounds() {
        let mut offset = 6;
        assert!(matches!(
            read_le_at::<u32>(&TEST_BUFFER, &mut offset),
            Err(OutOfBounds)
        ));
        assert_eq!(offset, 6);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u16>(&TEST_BUFFER, &mut offset).is_err());
    }

    #[test]
    fn read_dyn() {
        let mut offset = 0;
        assert_eq!(read_le_at_dyn(&TEST_BUFFER, &mut offset, false).unwrap(), 0x0201);
        assert_eq!(offset, 2);
        assert_eq!(
            read_le_at_dyn(&TEST_BUFFER, &mut offset, true).unwrap(),
            0x0605_0403
        );
        assert_eq!(offset, 6);
    }

    #[test]
    fn read_cstr_terminated() {
        let data = b"#Strings\0\0\0\0#Blob\0";
        assert_eq!(read_cstr(data, 0).unwrap(), "#Strings");
        assert_eq!(read_cstr(data, 12).unwrap(), "#Blob");
        assert!(read_cstr(b"#US", 0).is_err());
        assert!(read_cstr(data, 64).is_err());
    }

    #[test]
    fn compressed_uint() {
        let cases: [(&[u8], u32); 4] = [
            (&[0x03], 0x03),
            (&[0x7F], 0x7F),
            (&[0x80, 0x80], 0x80),
            (&[0xC0, 0x00, 0x40, 0x00], 0x4000),
        ];

        for (bytes, expected) in cases {
            let mut offset = 0;
            assert_eq!(read_compressed_uint(bytes, &mut offset).unwrap(), expected);
            assert_eq!(offset, bytes.len());
        }

        let mut offset = 0;
        assert!(read_compressed_uint(&[0xFF], &mut offset).is_err());
    }
}
