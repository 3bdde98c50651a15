use super::NDIRECT;

#[repr(u16)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InodeType {
    Empty = 0,
    File = 1,
    Directory = 2,
    Device = 3
}

impl InodeType {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Empty),
            1 => Some(Self::File),
            2 => Some(Self::Directory),
            3 => Some(Self::Device),
            _ => None,
        }
    }
}

/// On-disk inode structure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskInode {
    pub itype: u16, // File type
    pub major: u16, // Major device number (T_DEVICE only)
    pub minor: u16, // Minor device number (T_DEVICE only)
    pub nlink: u16, // Number of links to inode in file system
    pub size: u32, // Size of file (bytes)
    pub addrs: [u32; NDIRECT+2] // Data block addresses
}

impl DiskInode {
    /// Bytes taken by one inode on disk.
    pub const SIZE: usize = 12 + 4 * (NDIRECT + 2);

    pub const fn new() -> Self {
        Self {
            itype: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT+2]
        }
    }

    pub fn is_free(&self) -> bool {
        self.itype == InodeType::Empty as u16
    }

    /// Serialize into the first `SIZE` bytes of `dst`, little-endian.
    pub fn encode_into(&self, dst: &mut [u8]) {
        assert!(dst.len() >= Self::SIZE, "dinode encode: short buffer");
        dst[0..2].copy_from_slice(&self.itype.to_le_bytes());
        dst[2..4].copy_from_slice(&self.major.to_le_bytes());
        dst[4..6].copy_from_slice(&self.minor.to_le_bytes());
        dst[6..8].copy_from_slice(&self.nlink.to_le_bytes());
        dst[8..12].copy_from_slice(&self.size.to_le_bytes());
        for (i, addr) in self.addrs.iter().enumerate() {
            let at = 12 + 4 * i;
            dst[at..at + 4].copy_from_slice(&addr.to_le_bytes());
        }
    }

    pub fn decode(src: &[u8]) -> Self {
        assert!(src.len() >= Self::SIZE, "dinode decode: short buffer");
        let u16_at = |at: usize| u16::from_le_bytes([src[at], src[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([src[at], src[at + 1], src[at + 2], src[at + 3]])
        };
        let mut addrs = [0; NDIRECT+2];
        for (i, addr) in addrs.iter_mut().enumerate() {
            *addr = u32_at(12 + 4 * i);
        }
        Self {
            itype: u16_at(0),
            major: u16_at(2),
            minor: u16_at(4),
            nlink: u16_at(6),
            size: u32_at(8),
            addrs,
        }
    }
}

impl Default for DiskInode {
    fn default() -> Self {
        Self::new()
    }
}
