//! PE image reader.

use goblin::pe::PE;

use crate::{
    file::io::read_le,
    identity::{AssemblyIdentity, ProcessorArchitecture},
    image::{tables::read_assembly_identity, ImageHandle, ImageReader},
    Error::{Empty, NotSupported, OutOfBounds},
    Result,
};

const COMIMAGE_FLAGS_ILONLY: u32 = 0x0000_0001;
const COMIMAGE_FLAGS_32BITREQUIRED: u32 = 0x0000_0002;

/// Reads identities out of managed PE images.
///
/// The default reader of an application context. It maps candidate files through the
/// default [`ImageHandle::open`] and decodes only what the binder needs: the CLI header,
/// the metadata root and the `Assembly` row.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeImageReader;

impl PeImageReader {
    /// Creates a new reader.
    #[must_use]
    pub fn new() -> Self {
        PeImageReader
    }
}

impl ImageReader for PeImageReader {
    fn read_identity(&self, image: &ImageHandle) -> Result<AssemblyIdentity> {
        read_pe_identity(image.data())
    }
}

/// Reads the assembly identity of a managed PE image.
///
/// # Errors
///
/// - [`crate::Error::Empty`] for a zero-length image
/// - [`crate::Error::GoblinErr`] if the bytes are not a PE file
/// - [`crate::Error::NotSupported`] for a native image or a module without manifest
/// - [`crate::Error::Malformed`] for damaged CLI or metadata structures
pub fn read_pe_identity(data: &[u8]) -> Result<AssemblyIdentity> {
    if data.is_empty() {
        return Err(Empty);
    }

    let pe = PE::parse(data)?;
    let Some(optional_header) = pe.header.optional_header.as_ref() else {
        return Err(NotSupported);
    };
    let Some(clr_directory) = optional_header.data_directories.get_clr_runtime_header() else {
        return Err(NotSupported);
    };

    let cli_offset = rva_to_offset(&pe, clr_directory.virtual_address)?;
    let cli_header = data.get(cli_offset..).ok_or(OutOfBounds)?;
    let metadata_rva = read_le::<u32>(cli_header.get(8..).ok_or(OutOfBounds)?)?;
    let metadata_size = read_le::<u32>(cli_header.get(12..).ok_or(OutOfBounds)?)? as usize;
    let flags = read_le::<u32>(cli_header.get(16..).ok_or(OutOfBounds)?)?;

    let metadata_offset = rva_to_offset(&pe, metadata_rva)?;
    let metadata = metadata_offset
        .checked_add(metadata_size)
        .and_then(|end| data.get(metadata_offset..end))
        .ok_or_else(|| {
            malformed_error!(
                "Metadata exceeds image - {} + {}",
                metadata_offset,
                metadata_size
            )
        })?;

    let architecture = ProcessorArchitecture::from_machine(
        pe.header.coff_header.machine,
        flags & COMIMAGE_FLAGS_ILONLY != 0,
        flags & COMIMAGE_FLAGS_32BITREQUIRED != 0,
    );

    read_assembly_identity(metadata, architecture)
}

fn rva_to_offset(pe: &PE, rva: u32) -> Result<usize> {
    for section in &pe.sections {
        let Some(section_max) = section.virtual_address.checked_add(section.virtual_size) else {
            return Err(malformed_error!(
                "Section malformed, causing integer overflow - {} + {}",
                section.virtual_address,
                section.virtual_size
            ));
        };

        if section.virtual_address <= rva && rva < section_max {
            return Ok((rva - section.virtual_address) as usize
                + section.pointer_to_raw_data as usize);
        }
    }

    Err(malformed_error!(
        "RVA could not be converted to offset - 0x{:X}",
        rva
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::image::{tables::tests::build_metadata, ImageSource};

    fn put_u16(image: &mut [u8], offset: usize, value: u16) {
        image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(image: &mut [u8], offset: usize, value: u32) {
        image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Wraps a metadata root into a minimal PE32 image with a single `.text` section.
    pub(crate) fn build_pe(metadata: &[u8], machine: u16, cli_flags: u32) -> Vec<u8> {
        const PE_OFFSET: usize = 0x80;
        const OPTIONAL_OFFSET: usize = PE_OFFSET + 4 + 20;
        const SECTION_OFFSET: usize = OPTIONAL_OFFSET + 224;
        const RAW_OFFSET: usize = 0x200;
        const TEXT_RVA: u32 = 0x2000;

        let text_len = 72 + metadata.len();
        let raw_len = (text_len + 0x1FF) & !0x1FF;
        let mut image = vec![0u8; RAW_OFFSET + raw_len];

        // DOS header
        image[0..2].copy_from_slice(b"MZ");
        put_u32(&mut image, 0x3C, PE_OFFSET as u32);

        // PE signature and COFF header
        image[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(b"PE\0\0");
        put_u16(&mut image, PE_OFFSET + 4, machine);
        put_u16(&mut image, PE_OFFSET + 6, 1);
        put_u16(&mut image, PE_OFFSET + 20, 224);
        put_u16(&mut image, PE_OFFSET + 22, 0x2102);

        // Optional header, standard fields
        put_u16(&mut image, OPTIONAL_OFFSET, 0x10B);
        put_u32(&mut image, OPTIONAL_OFFSET + 4, raw_len as u32);
        put_u32(&mut image, OPTIONAL_OFFSET + 20, TEXT_RVA);
        // Windows fields
        put_u32(&mut image, OPTIONAL_OFFSET + 28, 0x0040_0000);
        put_u32(&mut image, OPTIONAL_OFFSET + 32, 0x2000);
        put_u32(&mut image, OPTIONAL_OFFSET + 36, 0x200);
        put_u16(&mut image, OPTIONAL_OFFSET + 40, 4);
        put_u16(&mut image, OPTIONAL_OFFSET + 48, 4);
        put_u32(&mut image, OPTIONAL_OFFSET + 56, 0x4000);
        put_u32(&mut image, OPTIONAL_OFFSET + 60, RAW_OFFSET as u32);
        put_u16(&mut image, OPTIONAL_OFFSET + 68, 3);
        put_u16(&mut image, OPTIONAL_OFFSET + 70, 0x8540);
        put_u32(&mut image, OPTIONAL_OFFSET + 72, 0x0010_0000);
        put_u32(&mut image, OPTIONAL_OFFSET + 76, 0x1000);
        put_u32(&mut image, OPTIONAL_OFFSET + 80, 0x0010_0000);
        put_u32(&mut image, OPTIONAL_OFFSET + 84, 0x1000);
        put_u32(&mut image, OPTIONAL_OFFSET + 92, 16);
        // Data directory 14, CLI header
        put_u32(&mut image, OPTIONAL_OFFSET + 96 + 14 * 8, TEXT_RVA);
        put_u32(&mut image, OPTIONAL_OFFSET + 96 + 14 * 8 + 4, 72);

        // Section table
        image[SECTION_OFFSET..SECTION_OFFSET + 5].copy_from_slice(b".text");
        put_u32(&mut image, SECTION_OFFSET + 8, text_len as u32);
        put_u32(&mut image, SECTION_OFFSET + 12, TEXT_RVA);
        put_u32(&mut image, SECTION_OFFSET + 16, raw_len as u32);
        put_u32(&mut image, SECTION_OFFSET + 20, RAW_OFFSET as u32);
        put_u32(&mut image, SECTION_OFFSET + 36, 0x6000_0020);

        // CLI header followed by the metadata root
        put_u32(&mut image, RAW_OFFSET, 72);
        put_u16(&mut image, RAW_OFFSET + 4, 2);
        put_u16(&mut image, RAW_OFFSET + 6, 5);
        put_u32(&mut image, RAW_OFFSET + 8, TEXT_RVA + 72);
        put_u32(&mut image, RAW_OFFSET + 12, metadata.len() as u32);
        put_u32(&mut image, RAW_OFFSET + 16, cli_flags);
        image[RAW_OFFSET + 72..RAW_OFFSET + 72 + metadata.len()].copy_from_slice(metadata);

        image
    }

    #[test]
    fn test_read_pe_identity() {
        let metadata = build_metadata("Foo", "", [1, 2, 0, 0], &[], 0);
        let image = build_pe(&metadata, 0x014C, COMIMAGE_FLAGS_ILONLY);

        let identity = read_pe_identity(&image).unwrap();
        assert_eq!(
            identity.display_name(),
            "Foo, Version=1.2.0.0, Culture=neutral, PublicKeyToken=null, ProcessorArchitecture=MSIL"
        );
    }

    #[test]
    fn test_read_pe_identity_x86() {
        let metadata = build_metadata("Native.Interop", "", [3, 0, 0, 0], &[], 0);
        let image = build_pe(
            &metadata,
            0x014C,
            COMIMAGE_FLAGS_ILONLY | COMIMAGE_FLAGS_32BITREQUIRED,
        );

        let identity = read_pe_identity(&image).unwrap();
        assert_eq!(
            identity.processor_architecture(),
            Some(ProcessorArchitecture::X86)
        );
    }

    #[test]
    fn test_reader_over_memory_source() {
        let metadata = build_metadata("Foo", "", [1, 0, 0, 0], &[], 0);
        let source = ImageSource::memory("Foo", build_pe(&metadata, 0x8664, 1));

        let reader = PeImageReader::new();
        let image = reader.open_image(&source).unwrap();
        let identity = reader.read_identity(&image).unwrap();

        assert_eq!(identity.name(), "Foo");
        assert_eq!(
            identity.processor_architecture(),
            Some(ProcessorArchitecture::AMD64)
        );
    }

    #[test]
    fn test_not_an_image() {
        assert!(matches!(read_pe_identity(&[]), Err(Empty)));
        assert!(read_pe_identity(b"Foo, Version=1.0.0.0").is_err());
        assert!(read_pe_identity(&[0u8; 512]).is_err());
    }
}
