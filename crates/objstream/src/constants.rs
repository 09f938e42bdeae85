//! Wire constants of the object stream protocol.

/// First two bytes of every stream.
pub const STREAM_MAGIC: u16 = 0xaced;
/// Protocol version following the magic.
pub const STREAM_VERSION: u16 = 5;

// Record tags
pub const TC_BASE: u8 = 0x70;
pub const TC_NULL: u8 = 0x70;
pub const TC_REFERENCE: u8 = 0x71;
pub const TC_CLASSDESC: u8 = 0x72;
pub const TC_OBJECT: u8 = 0x73;
pub const TC_STRING: u8 = 0x74;
pub const TC_ARRAY: u8 = 0x75;
pub const TC_CLASS: u8 = 0x76;
pub const TC_BLOCKDATA: u8 = 0x77;
pub const TC_ENDBLOCKDATA: u8 = 0x78;
pub const TC_RESET: u8 = 0x79;
pub const TC_BLOCKDATALONG: u8 = 0x7a;
pub const TC_EXCEPTION: u8 = 0x7b;
pub const TC_LONGSTRING: u8 = 0x7c;
pub const TC_PROXYCLASSDESC: u8 = 0x7d;
pub const TC_ENUM: u8 = 0x7e;
pub const TC_MAX: u8 = 0x7e;

/// Wire value of the first handle. Back-references carry `BASE_WIRE_HANDLE + (handle - 1)`.
pub const BASE_WIRE_HANDLE: i32 = 0x7e0000;

// Descriptor flags
pub const SC_WRITE_METHOD: u8 = 0x01;
pub const SC_SERIALIZABLE: u8 = 0x02;
pub const SC_EXTERNALIZABLE: u8 = 0x04;
pub const SC_BLOCK_DATA: u8 = 0x08;
pub const SC_ENUM: u8 = 0x10;

/// Largest block payload the writer emits in one header.
pub const MAX_BLOCK_SIZE: usize = 1024;
/// Largest payload that fits the short block header.
pub const MAX_SHORT_BLOCK: usize = 0xff;
/// Most interfaces a proxy descriptor may name.
pub const MAX_PROXY_INTERFACES: i32 = 65535;

// Well-known type names, pre-registered in every registry.
pub const OBJECT_TYPE: &str = "java.lang.Object";
pub const STRING_TYPE: &str = "java.lang.String";
pub const CLASS_TYPE: &str = "java.lang.Class";
pub const DESCRIPTOR_TYPE: &str = "java.io.ObjectStreamClass";
pub const ENUM_TYPE: &str = "java.lang.Enum";

/// Returns `true` for bytes inside the tag range.
#[inline]
pub fn is_tag(b: u8) -> bool {
    (TC_BASE..=TC_MAX).contains(&b)
}
