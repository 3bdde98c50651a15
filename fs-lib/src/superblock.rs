use super::{ FSMAGIC, IPB, BPB };

/// Raw super block describes the disk layout.
///
/// ```text
/// [ boot | super | log ... | inodes ... | bitmap ... | data ... ]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSuperBlock {
    pub magic: u32,      // Must be FSMAGIC
    pub size: u32,       // Size of file system image (blocks)
    pub nblocks: u32,    // Number of data blocks
    pub ninodes: u32,    // Number of inodes
    pub nlog: u32,       // Number of log blocks
    pub logstart: u32,   // Block number of first log block
    pub inodestart: u32, // Block number of first inode block
    pub bmapstart: u32,  // Block number of first free map block
}

impl RawSuperBlock {
    /// Bytes taken by the super block on disk.
    pub const SIZE: usize = 32;

    /// Lay out a file system of `size` blocks the way mkfs does.
    /// Returns None if the metadata alone would not fit.
    pub fn new(size: u32, ninodes: u32, nlog: u32) -> Option<Self> {
        let ninodeblocks = ninodes / IPB as u32 + 1;
        let nbitmap = size / BPB + 1;
        let nmeta = 2 + nlog + ninodeblocks + nbitmap;
        let nblocks = size.checked_sub(nmeta)?;
        Some(Self {
            magic: FSMAGIC,
            size,
            nblocks,
            ninodes,
            nlog,
            logstart: 2,
            inodestart: 2 + nlog,
            bmapstart: 2 + nlog + ninodeblocks,
        })
    }

    /// First block handed out by the block allocator.
    pub fn data_start(&self) -> u32 {
        self.size - self.nblocks
    }

    /// Number of blocks holding inodes.
    pub fn inode_blocks(&self) -> u32 {
        self.bmapstart - self.inodestart
    }

    /// Number of blocks holding the free bitmap.
    pub fn bitmap_blocks(&self) -> u32 {
        self.data_start() - self.bmapstart
    }

    /// Given an inode number.
    /// Return the blockno of the block this inode resides.
    pub fn locate_inode(&self, inum: u32) -> Option<u32> {
        if inum >= self.ninodes {
            return None
        }
        Some(inum / IPB as u32 + self.inodestart)
    }

    /// Given a block number in the disk.
    /// Returns the relevant block number of the (controlling) bitmap block.
    pub fn bitmap_blockno(&self, blockno: u32) -> u32 {
        blockno / BPB + self.bmapstart
    }

    pub fn encode_into(&self, dst: &mut [u8]) {
        assert!(dst.len() >= Self::SIZE, "superblock encode: short buffer");
        let fields = [
            self.magic, self.size, self.nblocks, self.ninodes,
            self.nlog, self.logstart, self.inodestart, self.bmapstart,
        ];
        for (i, field) in fields.iter().enumerate() {
            dst[4 * i..4 * i + 4].copy_from_slice(&field.to_le_bytes());
        }
    }

    pub fn decode(src: &[u8]) -> Self {
        assert!(src.len() >= Self::SIZE, "superblock decode: short buffer");
        let field = |i: usize| {
            u32::from_le_bytes([src[4 * i], src[4 * i + 1], src[4 * i + 2], src[4 * i + 3]])
        };
        Self {
            magic: field(0),
            size: field(1),
            nblocks: field(2),
            ninodes: field(3),
            nlog: field(4),
            logstart: field(5),
            inodestart: field(6),
            bmapstart: field(7),
        }
    }
}
