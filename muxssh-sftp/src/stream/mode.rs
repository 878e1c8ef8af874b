use bitflags::bitflags;

use crate::{protocol::OpenFlags, Error, Result};

/// How the remote file is opened or created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    /// Create a new file, failing if it already exists.
    CreateNew,

    /// Create a new file, truncating it if it already exists.
    Create,

    /// Open an existing file.
    Open,

    /// Open the file if it exists, create it otherwise.
    OpenOrCreate,

    /// Open an existing file and truncate it to zero length.
    Truncate,

    /// Open or create the file, and seek to its end.
    Append,
}

/// The access requested on the remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileAccess(u32);

bitflags! {
    impl FileAccess: u32 {
        /// Read access.
        const READ = 0x1;

        /// Write access.
        const WRITE = 0x2;

        /// Read and write access.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

impl std::fmt::Display for FileAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::READ => f.write_str("Read"),
            Self::WRITE => f.write_str("Write"),
            Self::READ_WRITE => f.write_str("ReadWrite"),
            other => write!(f, "{:#x}", other.bits()),
        }
    }
}

/// Check the `mode` and `access` combination, and derive the flags of the open request.
pub(super) fn open_flags(mode: FileMode, access: FileAccess) -> Result<OpenFlags> {
    if access.is_empty() || !FileAccess::all().contains(access) {
        return Err(Error::OutOfRange { param: "access" });
    }

    if mode == FileMode::Append && access.contains(FileAccess::READ) {
        return Err(Error::InvalidArgument {
            message: format!(
                "{mode:?} mode can be requested only when combined with write-only access."
            ),
            param: "mode",
        });
    }

    if !access.contains(FileAccess::WRITE)
        && matches!(
            mode,
            FileMode::CreateNew | FileMode::Create | FileMode::Truncate | FileMode::Append
        )
    {
        return Err(Error::InvalidArgument {
            message: format!("Combining FileMode: {mode:?} with FileAccess: {access} is invalid."),
            param: "access",
        });
    }

    let mut flags = OpenFlags::empty();
    flags.set(OpenFlags::READ, access.contains(FileAccess::READ));
    flags.set(OpenFlags::WRITE, access.contains(FileAccess::WRITE));

    flags |= match mode {
        FileMode::CreateNew => OpenFlags::CREAT | OpenFlags::EXCL,
        FileMode::Create => OpenFlags::CREAT | OpenFlags::TRUNC,
        FileMode::Open => OpenFlags::empty(),
        FileMode::OpenOrCreate => OpenFlags::CREAT,
        FileMode::Truncate => OpenFlags::TRUNC,
        FileMode::Append => OpenFlags::APPEND | OpenFlags::CREAT,
    };

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(FileMode::Create, FileAccess::READ_WRITE, OpenFlags::READ | OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::TRUNC)]
    #[case(FileMode::CreateNew, FileAccess::WRITE, OpenFlags::WRITE | OpenFlags::CREAT | OpenFlags::EXCL)]
    #[case(FileMode::Open, FileAccess::READ, OpenFlags::READ)]
    #[case(FileMode::OpenOrCreate, FileAccess::READ, OpenFlags::READ | OpenFlags::CREAT)]
    #[case(FileMode::Truncate, FileAccess::WRITE, OpenFlags::WRITE | OpenFlags::TRUNC)]
    #[case(FileMode::Append, FileAccess::WRITE, OpenFlags::WRITE | OpenFlags::APPEND | OpenFlags::CREAT)]
    fn flags_are_derived_from_mode_and_access(
        #[case] mode: FileMode,
        #[case] access: FileAccess,
        #[case] expected: OpenFlags,
    ) {
        assert_eq!(open_flags(mode, access).unwrap(), expected);
    }

    #[rstest]
    #[case(FileMode::Append, FileAccess::READ)]
    #[case(FileMode::Append, FileAccess::READ_WRITE)]
    fn append_requires_write_only_access(#[case] mode: FileMode, #[case] access: FileAccess) {
        match open_flags(mode, access) {
            Err(Error::InvalidArgument { message, param }) => {
                assert_eq!(param, "mode");
                assert_eq!(
                    message,
                    "Append mode can be requested only when combined with write-only access."
                );
            }
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[rstest]
    #[case(FileMode::CreateNew)]
    #[case(FileMode::Create)]
    #[case(FileMode::Truncate)]
    fn writing_modes_require_write_access(#[case] mode: FileMode) {
        match open_flags(mode, FileAccess::READ) {
            Err(Error::InvalidArgument { message, .. }) => assert_eq!(
                message,
                format!("Combining FileMode: {mode:?} with FileAccess: Read is invalid.")
            ),
            other => panic!("Unexpected result: {other:?}"),
        }
    }

    #[rstest]
    #[case(FileAccess::empty())]
    #[case(FileAccess::from_bits_retain(4))]
    #[case(FileAccess::from_bits_retain(7))]
    fn unknown_access_is_out_of_range(#[case] access: FileAccess) {
        assert!(matches!(
            open_flags(FileMode::Open, access),
            Err(Error::OutOfRange { param: "access" })
        ));
    }
}
