use binrw::binrw;
use bitflags::bitflags;
use muxssh::arch::Bytes;

/// Presence flags of the optional fields in [`Attrs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttrFlags(u32);

bitflags! {
    impl AttrFlags: u32 {
        /// The `size` field is present.
        const SIZE = 0x0000_0001;

        /// The `uid` and `gid` fields are present.
        const UIDGID = 0x0000_0002;

        /// The `permissions` field is present.
        const PERMISSIONS = 0x0000_0004;

        /// The `atime` and `mtime` fields are present.
        const ACMODTIME = 0x0000_0008;

        /// Extended attributes are present.
        const EXTENDED = 0x8000_0000;
    }
}

/// File attributes, as described in `draft-ietf-secsh-filexfer-02` §5.
#[binrw]
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[brw(big)]
pub struct Attrs {
    #[br(temp)]
    #[bw(calc = presence(size, ids, permissions, times, extended).bits())]
    flags: u32,

    /// Size of the file in bytes.
    #[br(if(flags & AttrFlags::SIZE.bits() != 0))]
    pub size: Option<u64>,

    /// Owner and group identifiers.
    #[br(if(flags & AttrFlags::UIDGID.bits() != 0))]
    pub ids: Option<(u32, u32)>,

    /// POSIX permission bits, including the file type.
    #[br(if(flags & AttrFlags::PERMISSIONS.bits() != 0))]
    pub permissions: Option<u32>,

    /// Access and modification times, in seconds since the epoch.
    #[br(if(flags & AttrFlags::ACMODTIME.bits() != 0))]
    pub times: Option<(u32, u32)>,

    #[br(temp, if(flags & AttrFlags::EXTENDED.bits() != 0))]
    #[bw(calc = (!extended.is_empty()).then_some(extended.len() as u32))]
    extended_count: Option<u32>,

    /// Vendor-specific extended attributes, as type and data pairs.
    #[br(count = extended_count.unwrap_or_default())]
    pub extended: Vec<(Bytes, Bytes)>,
}

fn presence(
    size: &Option<u64>,
    ids: &Option<(u32, u32)>,
    permissions: &Option<u32>,
    times: &Option<(u32, u32)>,
    extended: &[(Bytes, Bytes)],
) -> AttrFlags {
    let mut flags = AttrFlags::empty();

    flags.set(AttrFlags::SIZE, size.is_some());
    flags.set(AttrFlags::UIDGID, ids.is_some());
    flags.set(AttrFlags::PERMISSIONS, permissions.is_some());
    flags.set(AttrFlags::ACMODTIME, times.is_some());
    flags.set(AttrFlags::EXTENDED, !extended.is_empty());

    flags
}

impl Attrs {
    /// Attributes carrying only a `size`, as used to truncate or extend a file.
    pub fn with_size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    /// Whether the attributes describe a directory.
    pub fn is_dir(&self) -> bool {
        self.permissions
            .is_some_and(|permissions| permissions & 0o170000 == 0o040000)
    }

    /// Whether the attributes describe a regular file.
    pub fn is_file(&self) -> bool {
        self.permissions
            .is_some_and(|permissions| permissions & 0o170000 == 0o100000)
    }

    /// Whether the attributes describe a symbolic link.
    pub fn is_symlink(&self) -> bool {
        self.permissions
            .is_some_and(|permissions| permissions & 0o170000 == 0o120000)
    }
}
