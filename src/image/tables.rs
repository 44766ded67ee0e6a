//! Minimal ECMA-335 metadata decoding.
//!
//! Reading an assembly identity needs a single row of the `Assembly` table, but the table
//! stream stores all tables back to back with variable-width columns. To find that row the
//! decoder sizes every table that precedes it (0x00 to 0x1F), which requires the heap index
//! widths and the widths of simple and coded table indexes.

use crate::{
    file::io::{read_compressed_uint, read_cstr, read_le, read_le_at, read_le_at_dyn},
    identity::{AssemblyIdentity, AssemblyVersion, ProcessorArchitecture, PublicKeyToken},
    Error::{NotSupported, OutOfBounds},
    Result,
};

const METADATA_SIGNATURE: u32 = 0x424A_5342;
const ASSEMBLY_TABLE: usize = 0x20;

/// Parsed metadata root with its stream directory.
#[derive(Debug)]
pub struct MetadataRoot<'a> {
    /// Runtime version string, e.g. `v4.0.30319`
    pub version: &'a str,
    streams: Vec<(&'a str, &'a [u8])>,
}

impl<'a> MetadataRoot<'a> {
    /// Parses the metadata root at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Malformed`] for a bad signature or a stream that lies
    /// outside of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if read_le::<u32>(data)? != METADATA_SIGNATURE {
            return Err(malformed_error!("Invalid metadata root signature"));
        }

        let mut offset = 12;
        let version_len = read_le_at::<u32>(data, &mut offset)? as usize;
        let version_bytes = data
            .get(offset..offset.saturating_add(version_len))
            .ok_or(OutOfBounds)?;
        let version = std::str::from_utf8(version_bytes)
            .map_err(|_| malformed_error!("Invalid metadata version string"))?
            .trim_end_matches('\0');

        offset += version_len + 2;
        let stream_count = read_le_at::<u16>(data, &mut offset)?;

        let mut streams = Vec::with_capacity(usize::from(stream_count));
        for _ in 0..stream_count {
            let stream_offset = read_le_at::<u32>(data, &mut offset)? as usize;
            let stream_size = read_le_at::<u32>(data, &mut offset)? as usize;
            let name = read_cstr(data, offset)?;

            // name plus terminator, padded to four bytes
            offset += (name.len() + 4) & !3;

            let Some(stream) = stream_offset
                .checked_add(stream_size)
                .and_then(|end| data.get(stream_offset..end))
            else {
                return Err(malformed_error!(
                    "Stream {} exceeds metadata - {} + {}",
                    name,
                    stream_offset,
                    stream_size
                ));
            };

            streams.push((name, stream));
        }

        Ok(MetadataRoot { version, streams })
    }

    /// Returns the stream with the given name.
    #[must_use]
    pub fn stream(&self, name: &str) -> Option<&'a [u8]> {
        self.streams
            .iter()
            .find(|(stream, _)| *stream == name)
            .map(|(_, data)| *data)
    }
}

#[derive(Clone, Copy)]
enum Column {
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Table(usize),
    Coded(u8, &'static [usize]),
}

const TYPE_DEF_OR_REF: Column = Column::Coded(2, &[0x02, 0x01, 0x1B]);
const HAS_CONSTANT: Column = Column::Coded(2, &[0x04, 0x08, 0x17]);
const HAS_CUSTOM_ATTRIBUTE: Column = Column::Coded(
    5,
    &[
        0x06, 0x04, 0x01, 0x02, 0x08, 0x09, 0x0A, 0x00, 0x0E, 0x17, 0x14, 0x11, 0x1A, 0x1B, 0x20,
        0x23, 0x26, 0x27, 0x28, 0x2A, 0x2C, 0x2B,
    ],
);
const HAS_FIELD_MARSHAL: Column = Column::Coded(1, &[0x04, 0x08]);
const HAS_DECL_SECURITY: Column = Column::Coded(2, &[0x02, 0x06, 0x20]);
const MEMBER_REF_PARENT: Column = Column::Coded(3, &[0x02, 0x01, 0x1A, 0x06, 0x1B]);
const HAS_SEMANTICS: Column = Column::Coded(1, &[0x14, 0x17]);
const METHOD_DEF_OR_REF: Column = Column::Coded(1, &[0x06, 0x0A]);
const MEMBER_FORWARDED: Column = Column::Coded(1, &[0x04, 0x06]);
const RESOLUTION_SCOPE: Column = Column::Coded(2, &[0x00, 0x1A, 0x23, 0x01]);
const CUSTOM_ATTRIBUTE_TYPE: Column = Column::Coded(3, &[0x06, 0x0A]);

/// Column layout of the tables stored in front of the `Assembly` table.
const SCHEMAS: [&[Column]; ASSEMBLY_TABLE] = [
    // Module
    &[Column::U16, Column::Str, Column::Guid, Column::Guid, Column::Guid],
    // TypeRef
    &[RESOLUTION_SCOPE, Column::Str, Column::Str],
    // TypeDef
    &[
        Column::U32,
        Column::Str,
        Column::Str,
        TYPE_DEF_OR_REF,
        Column::Table(0x04),
        Column::Table(0x06),
    ],
    // FieldPtr
    &[Column::Table(0x04)],
    // Field
    &[Column::U16, Column::Str, Column::Blob],
    // MethodPtr
    &[Column::Table(0x06)],
    // MethodDef
    &[
        Column::U32,
        Column::U16,
        Column::U16,
        Column::Str,
        Column::Blob,
        Column::Table(0x08),
    ],
    // ParamPtr
    &[Column::Table(0x08)],
    // Param
    &[Column::U16, Column::U16, Column::Str],
    // InterfaceImpl
    &[Column::Table(0x02), TYPE_DEF_OR_REF],
    // MemberRef
    &[MEMBER_REF_PARENT, Column::Str, Column::Blob],
    // Constant (type byte plus padding byte)
    &[Column::U16, HAS_CONSTANT, Column::Blob],
    // CustomAttribute
    &[HAS_CUSTOM_ATTRIBUTE, CUSTOM_ATTRIBUTE_TYPE, Column::Blob],
    // FieldMarshal
    &[HAS_FIELD_MARSHAL, Column::Blob],
    // DeclSecurity
    &[Column::U16, HAS_DECL_SECURITY, Column::Blob],
    // ClassLayout
    &[Column::U16, Column::U32, Column::Table(0x02)],
    // FieldLayout
    &[Column::U32, Column::Table(0x04)],
    // StandAloneSig
    &[Column::Blob],
    // EventMap
    &[Column::Table(0x02), Column::Table(0x14)],
    // EventPtr
    &[Column::Table(0x14)],
    // Event
    &[Column::U16, Column::Str, TYPE_DEF_OR_REF],
    // PropertyMap
    &[Column::Table(0x02), Column::Table(0x17)],
    // PropertyPtr
    &[Column::Table(0x17)],
    // Property
    &[Column::U16, Column::Str, Column::Blob],
    // MethodSemantics
    &[Column::U16, Column::Table(0x06), HAS_SEMANTICS],
    // MethodImpl
    &[Column::Table(0x02), METHOD_DEF_OR_REF, METHOD_DEF_OR_REF],
    // ModuleRef
    &[Column::Str],
    // TypeSpec
    &[Column::Blob],
    // ImplMap
    &[
        Column::U16,
        MEMBER_FORWARDED,
        Column::Str,
        Column::Table(0x1A),
    ],
    // FieldRVA
    &[Column::U32, Column::Table(0x04)],
    // EncLog
    &[Column::U32, Column::U32],
    // EncMap
    &[Column::U32],
];

/// The `#~` stream header: heap widths and row counts.
struct TablesHeader {
    heap_sizes: u8,
    rows: [u32; 64],
    data_offset: usize,
}

impl TablesHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        let heap_sizes = *data.get(6).ok_or(OutOfBounds)?;
        let mut offset = 8;
        let valid = read_le_at::<u64>(data, &mut offset)?;
        offset += 8;

        let mut rows = [0u32; 64];
        for (table, count) in rows.iter_mut().enumerate() {
            if valid & (1 << table) != 0 {
                *count = read_le_at::<u32>(data, &mut offset)?;
            }
        }

        if heap_sizes & 0x40 != 0 {
            offset += 4;
        }

        Ok(TablesHeader {
            heap_sizes,
            rows,
            data_offset: offset,
        })
    }

    fn large_strings(&self) -> bool {
        self.heap_sizes & 0x01 != 0
    }

    fn large_blobs(&self) -> bool {
        self.heap_sizes & 0x04 != 0
    }

    fn column_width(&self, column: Column) -> usize {
        let wide = |large: bool| if large { 4 } else { 2 };

        match column {
            Column::U16 => 2,
            Column::U32 => 4,
            Column::Str => wide(self.large_strings()),
            Column::Guid => wide(self.heap_sizes & 0x02 != 0),
            Column::Blob => wide(self.large_blobs()),
            Column::Table(table) => wide(self.rows[table] > 0xFFFF),
            Column::Coded(bits, tables) => {
                let max_rows = tables
                    .iter()
                    .map(|&table| self.rows[table])
                    .max()
                    .unwrap_or(0);
                wide(u64::from(max_rows) >= 1u64 << (16 - bits))
            }
        }
    }

    fn row_size(&self, table: usize) -> usize {
        SCHEMAS[table]
            .iter()
            .map(|&column| self.column_width(column))
            .sum()
    }

    /// Offset of the first `Assembly` row inside the tables stream.
    fn assembly_offset(&self) -> Result<usize> {
        let mut offset = self.data_offset;
        for table in 0..ASSEMBLY_TABLE {
            let size = self
                .row_size(table)
                .checked_mul(self.rows[table] as usize)
                .ok_or_else(|| malformed_error!("Table 0x{:02X} size overflows", table))?;
            offset = offset
                .checked_add(size)
                .ok_or_else(|| malformed_error!("Table 0x{:02X} size overflows", table))?;
        }
        Ok(offset)
    }
}

fn read_blob(heap: &[u8], index: u32) -> Result<&[u8]> {
    let mut offset = index as usize;
    let len = read_compressed_uint(heap, &mut offset)? as usize;
    heap.get(offset..offset.saturating_add(len))
        .ok_or(OutOfBounds)
}

/// Decodes the assembly identity from a metadata root.
///
/// # Arguments
///
/// * `metadata` - The metadata root and everything after it
/// * `architecture` - Architecture derived from the PE headers, if known
///
/// # Errors
///
/// Returns [`crate::Error::NotSupported`] when the metadata has no `Assembly` row (a
/// module without manifest) and [`crate::Error::Malformed`] or
/// [`crate::Error::OutOfBounds`] for damaged metadata.
pub fn read_assembly_identity(
    metadata: &[u8],
    architecture: Option<ProcessorArchitecture>,
) -> Result<AssemblyIdentity> {
    let root = MetadataRoot::parse(metadata)?;

    let tables = root
        .stream("#~")
        .or_else(|| root.stream("#-"))
        .ok_or_else(|| malformed_error!("Metadata has no tables stream"))?;
    let strings = root
        .stream("#Strings")
        .ok_or_else(|| malformed_error!("Metadata has no #Strings heap"))?;
    let blobs = root.stream("#Blob").unwrap_or_default();

    let header = TablesHeader::parse(tables)?;
    if header.rows[ASSEMBLY_TABLE] == 0 {
        return Err(NotSupported);
    }

    let mut offset = header.assembly_offset()?;
    let _hash_algorithm = read_le_at::<u32>(tables, &mut offset)?;
    let major = read_le_at::<u16>(tables, &mut offset)?;
    let minor = read_le_at::<u16>(tables, &mut offset)?;
    let build = read_le_at::<u16>(tables, &mut offset)?;
    let revision = read_le_at::<u16>(tables, &mut offset)?;
    let _flags = read_le_at::<u32>(tables, &mut offset)?;
    let public_key = read_le_at_dyn(tables, &mut offset, header.large_blobs())?;
    let name = read_le_at_dyn(tables, &mut offset, header.large_strings())?;
    let culture = read_le_at_dyn(tables, &mut offset, header.large_strings())?;

    let name = read_cstr(strings, name as usize)?;
    if name.is_empty() {
        return Err(malformed_error!("Assembly row has an empty name"));
    }

    let culture = match culture {
        0 => None,
        index => Some(read_cstr(strings, index as usize)?.to_string()),
    };

    let public_key_token = match public_key {
        0 => None,
        index => {
            let key = read_blob(blobs, index)?;
            (!key.is_empty()).then(|| PublicKeyToken::from_public_key(key))
        }
    };

    Ok(AssemblyIdentity::new(
        name,
        AssemblyVersion::new(major, minor, build, revision),
        culture,
        public_key_token,
        architecture,
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn pad4(data: &mut Vec<u8>) {
        while data.len() % 4 != 0 {
            data.push(0);
        }
    }

    /// Builds a metadata root with a Module row, `type_refs` TypeRef rows and one
    /// Assembly row.
    pub(crate) fn build_metadata(
        name: &str,
        culture: &str,
        version: [u16; 4],
        public_key: &[u8],
        type_refs: u32,
    ) -> Vec<u8> {
        let mut strings = vec![0u8];
        let name_index = strings.len() as u16;
        strings.extend_from_slice(name.as_bytes());
        strings.push(0);
        let culture_index = if culture.is_empty() {
            0
        } else {
            let index = strings.len() as u16;
            strings.extend_from_slice(culture.as_bytes());
            strings.push(0);
            index
        };
        pad4(&mut strings);

        let mut blobs = vec![0u8];
        let key_index = if public_key.is_empty() {
            0
        } else {
            let index = blobs.len() as u16;
            blobs.push(public_key.len() as u8);
            blobs.extend_from_slice(public_key);
            index
        };
        pad4(&mut blobs);

        let mut tables = Vec::new();
        tables.extend_from_slice(&0u32.to_le_bytes());
        tables.extend_from_slice(&[2, 0, 0, 1]);
        let mut valid: u64 = 1 | (1 << ASSEMBLY_TABLE);
        if type_refs > 0 {
            valid |= 1 << 0x01;
        }
        tables.extend_from_slice(&valid.to_le_bytes());
        tables.extend_from_slice(&0u64.to_le_bytes());
        tables.extend_from_slice(&1u32.to_le_bytes());
        if type_refs > 0 {
            tables.extend_from_slice(&type_refs.to_le_bytes());
        }
        tables.extend_from_slice(&1u32.to_le_bytes());

        // Module: generation, name, mvid, encid, encbaseid
        tables.extend_from_slice(&[0u8; 10]);
        // TypeRef: resolution scope, name, namespace
        for _ in 0..type_refs {
            tables.extend_from_slice(&[0u8; 6]);
        }
        // Assembly
        tables.extend_from_slice(&0x8004u32.to_le_bytes());
        for part in version {
            tables.extend_from_slice(&part.to_le_bytes());
        }
        tables.extend_from_slice(&u32::from(!public_key.is_empty()).to_le_bytes());
        tables.extend_from_slice(&key_index.to_le_bytes());
        tables.extend_from_slice(&name_index.to_le_bytes());
        tables.extend_from_slice(&culture_index.to_le_bytes());
        pad4(&mut tables);

        let version_string = b"v4.0.30319\0\0";
        let streams: [(&str, &[u8]); 3] =
            [("#~", &tables), ("#Strings", &strings), ("#Blob", &blobs)];

        let header_len: usize = 16
            + version_string.len()
            + 4
            + streams
                .iter()
                .map(|(name, _)| 8 + ((name.len() + 4) & !3))
                .sum::<usize>();

        let mut root = Vec::new();
        root.extend_from_slice(&METADATA_SIGNATURE.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&1u16.to_le_bytes());
        root.extend_from_slice(&0u32.to_le_bytes());
        root.extend_from_slice(&(version_string.len() as u32).to_le_bytes());
        root.extend_from_slice(version_string);
        root.extend_from_slice(&0u16.to_le_bytes());
        root.extend_from_slice(&(streams.len() as u16).to_le_bytes());

        let mut stream_offset = header_len;
        for (name, data) in &streams {
            root.extend_from_slice(&(stream_offset as u32).to_le_bytes());
            root.extend_from_slice(&(data.len() as u32).to_le_bytes());
            root.extend_from_slice(name.as_bytes());
            root.push(0);
            pad4(&mut root);
            stream_offset += data.len();
        }
        assert_eq!(root.len(), header_len);

        for (_, data) in &streams {
            root.extend_from_slice(data);
        }
        root
    }

    #[test]
    fn test_metadata_root_streams() {
        let metadata = build_metadata("Foo", "", [1, 0, 0, 0], &[], 0);
        let root = MetadataRoot::parse(&metadata).unwrap();

        assert_eq!(root.version, "v4.0.30319");
        assert!(root.stream("#~").is_some());
        assert_eq!(&root.stream("#Strings").unwrap()[..5], b"\0Foo\0");
        assert!(root.stream("#US").is_none());
    }

    #[test]
    fn test_read_identity() {
        let metadata = build_metadata("Foo", "", [1, 2, 3, 4], &[], 0);
        let identity = read_assembly_identity(&metadata, None).unwrap();

        assert_eq!(
            identity.display_name(),
            "Foo, Version=1.2.3.4, Culture=neutral, PublicKeyToken=null"
        );
    }

    #[test]
    fn test_read_identity_strong_named_satellite() {
        let ecma_key = [0, 0, 0, 0, 0, 0, 0, 0, 4, 0, 0, 0, 0, 0, 0, 0];
        let metadata = build_metadata("Foo.resources", "de-DE", [2, 0, 0, 0], &ecma_key, 3);
        let identity =
            read_assembly_identity(&metadata, Some(ProcessorArchitecture::MSIL)).unwrap();

        assert_eq!(
            identity.display_name(),
            "Foo.resources, Version=2.0.0.0, Culture=de-DE, PublicKeyToken=b77a5c561934e089, ProcessorArchitecture=MSIL"
        );
    }

    #[test]
    fn test_coded_index_width() {
        let mut header = TablesHeader {
            heap_sizes: 0,
            rows: [0; 64],
            data_offset: 24,
        };
        assert_eq!(header.column_width(RESOLUTION_SCOPE), 2);
        assert_eq!(header.row_size(0x01), 6);

        header.rows[0x23] = 1 << 14;
        assert_eq!(header.column_width(RESOLUTION_SCOPE), 4);
        assert_eq!(header.row_size(0x01), 8);

        header.heap_sizes = 0x01;
        assert_eq!(header.row_size(0x01), 12);
    }

    #[test]
    fn test_invalid_metadata() {
        assert!(MetadataRoot::parse(&[0u8; 32]).is_err());
        assert!(MetadataRoot::parse(&[]).is_err());

        let mut metadata = build_metadata("Foo", "", [1, 0, 0, 0], &[], 0);
        metadata.truncate(metadata.len() - 8);
        assert!(read_assembly_identity(&metadata, None).is_err());
    }
}
