//! xattr 块编解码
//!
//! 块布局：
//!
//! ```text
//! +--------+---------+---------+-----+------+ ... +---------+---------+
//! | header | entry 0 | entry 1 | ... | 0u32 | 空闲 | value 1 | value 0 |
//! +--------+---------+---------+-----+------+ ... +---------+---------+
//! ```
//!
//! header 32 字节（magic、refcount、blocks、hash），条目 16 字节加 4 字节对齐的名字，
//! 值从块尾向前排列，同样按 4 字节对齐。

use super::hash::{block_hash, entry_hash};
use super::prefix::Namespace;
use crate::{
    consts::*,
    error::{Error, ErrorKind, Result},
};
use alloc::vec::Vec;
use byteorder::{ByteOrder, LittleEndian};

/// 一个解码后的属性
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XattrEntry {
    /// 命名空间
    pub ns: Namespace,
    /// 去掉前缀的名字
    pub name: Vec<u8>,
    /// 属性值
    pub value: Vec<u8>,
}

impl XattrEntry {
    fn matches(&self, ns: Namespace, name: &[u8]) -> bool {
        self.ns == ns && self.name == name
    }

    /// 条目描述部分占用的字节数（不含值）
    fn entry_len(&self) -> usize {
        EXT2_XATTR_ENTRY_SIZE + pad(self.name.len())
    }
}

/// 解码后的整块
#[derive(Debug, Clone, Default)]
pub struct XattrBlock {
    /// 共享该块的 inode 数
    pub refcount: u32,
    /// 属性按 (索引, 名字长度, 名字) 排序
    pub entries: Vec<XattrEntry>,
}

#[inline]
fn pad(len: usize) -> usize {
    (len + EXT2_XATTR_PAD - 1) & !(EXT2_XATTR_PAD - 1)
}

impl XattrBlock {
    /// 查找属性
    pub fn find(&self, ns: Namespace, name: &[u8]) -> Option<&XattrEntry> {
        self.entries.iter().find(|e| e.matches(ns, name))
    }

    /// 插入或替换属性，保持排序
    pub fn upsert(&mut self, ns: Namespace, name: &[u8], value: &[u8]) {
        if let Some(e) = self.entries.iter_mut().find(|e| e.matches(ns, name)) {
            e.value = value.to_vec();
            return;
        }
        let key = (ns.index(), name.len(), name);
        let pos = self
            .entries
            .iter()
            .position(|e| (e.ns.index(), e.name.len(), e.name.as_slice()) > key)
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, XattrEntry { ns, name: name.to_vec(), value: value.to_vec() });
    }

    /// 删除属性，返回是否存在
    pub fn remove(&mut self, ns: Namespace, name: &[u8]) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !e.matches(ns, name));
        self.entries.len() != before
    }

    /// 编码后需要的字节数
    pub fn encoded_len(&self) -> usize {
        EXT2_XATTR_HEADER_SIZE
            + self.entries.iter().map(|e| e.entry_len() + pad(e.value.len())).sum::<usize>()
            + 4
    }

    /// 解码一个 xattr 块
    ///
    /// # 错误
    ///
    /// 魔数、块数、条目边界或值区间不合法时返回 `Corrupted`
    pub fn decode(data: &[u8]) -> Result<Self> {
        let corrupt = |msg| Error::new(ErrorKind::Corrupted, msg);
        if data.len() < EXT2_XATTR_HEADER_SIZE + 4 {
            return Err(corrupt("xattr block too small"));
        }
        if LittleEndian::read_u32(&data[0..4]) != EXT2_XATTR_MAGIC {
            return Err(corrupt("bad xattr block magic"));
        }
        if LittleEndian::read_u32(&data[8..12]) != 1 {
            return Err(corrupt("multi-block xattr"));
        }
        let refcount = LittleEndian::read_u32(&data[4..8]);

        let mut entries = Vec::new();
        let mut off = EXT2_XATTR_HEADER_SIZE;
        // 值区的最低地址，条目区不能越过它
        let mut min_value = data.len();
        loop {
            if off + 4 > min_value {
                return Err(corrupt("xattr entry table overruns values"));
            }
            if LittleEndian::read_u32(&data[off..off + 4]) == 0 {
                break;
            }
            if off + EXT2_XATTR_ENTRY_SIZE > min_value {
                return Err(corrupt("xattr entry out of bounds"));
            }
            let e = &data[off..off + EXT2_XATTR_ENTRY_SIZE];
            let name_len = e[0] as usize;
            let ns = Namespace::from_index(e[1]).ok_or(corrupt("unknown xattr name index"))?;
            let value_offs = LittleEndian::read_u16(&e[2..4]) as usize;
            let value_block = LittleEndian::read_u32(&e[4..8]);
            let value_size = LittleEndian::read_u32(&e[8..12]) as usize;

            let name_start = off + EXT2_XATTR_ENTRY_SIZE;
            let name_end = name_start + name_len;
            if name_len == 0 && !matches!(ns, Namespace::PosixAclAccess | Namespace::PosixAclDefault) {
                return Err(corrupt("empty xattr name"));
            }
            if name_end > data.len() || value_block != 0 {
                return Err(corrupt("xattr entry out of bounds"));
            }
            if value_size != 0 {
                if value_offs < name_end || value_offs + value_size > data.len() {
                    return Err(corrupt("xattr value out of bounds"));
                }
                min_value = min_value.min(value_offs);
            }
            entries.push(XattrEntry {
                ns,
                name: data[name_start..name_end].to_vec(),
                value: data[value_offs..value_offs + value_size].to_vec(),
            });
            off = name_start + pad(name_len);
        }
        Ok(Self { refcount, entries })
    }

    /// 把块编码到 `out`（整块长度，先清零）
    ///
    /// # 错误
    ///
    /// 内容放不进一个块时返回 `NoSpace`
    pub fn encode(&self, out: &mut [u8]) -> Result<()> {
        if self.encoded_len() > out.len() {
            return Err(Error::new(ErrorKind::NoSpace, "xattr block full"));
        }
        out.fill(0);

        let mut off = EXT2_XATTR_HEADER_SIZE;
        let mut value_end = out.len();
        let mut hashes = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            let value_offs = if e.value.is_empty() {
                0
            } else {
                value_end -= pad(e.value.len());
                out[value_end..value_end + e.value.len()].copy_from_slice(&e.value);
                value_end
            };
            let hash = entry_hash(&e.name, &e.value);
            hashes.push(hash);

            let rec = &mut out[off..off + EXT2_XATTR_ENTRY_SIZE];
            rec[0] = e.name.len() as u8;
            rec[1] = e.ns.index();
            LittleEndian::write_u16(&mut rec[2..4], value_offs as u16);
            LittleEndian::write_u32(&mut rec[4..8], 0);
            LittleEndian::write_u32(&mut rec[8..12], e.value.len() as u32);
            LittleEndian::write_u32(&mut rec[12..16], hash);
            let name_start = off + EXT2_XATTR_ENTRY_SIZE;
            out[name_start..name_start + e.name.len()].copy_from_slice(&e.name);
            off = name_start + pad(e.name.len());
        }

        LittleEndian::write_u32(&mut out[0..4], EXT2_XATTR_MAGIC);
        LittleEndian::write_u32(&mut out[4..8], self.refcount);
        LittleEndian::write_u32(&mut out[8..12], 1);
        LittleEndian::write_u32(&mut out[12..16], block_hash(hashes));
        Ok(())
    }
}

/// 读取块头中的引用计数
pub fn read_refcount(data: &[u8]) -> Result<u32> {
    if data.len() < EXT2_XATTR_HEADER_SIZE || LittleEndian::read_u32(&data[0..4]) != EXT2_XATTR_MAGIC {
        return Err(Error::new(ErrorKind::Corrupted, "bad xattr block magic"));
    }
    Ok(LittleEndian::read_u32(&data[4..8]))
}

/// 改写块头中的引用计数
pub fn write_refcount(data: &mut [u8], refcount: u32) {
    LittleEndian::write_u32(&mut data[4..8], refcount);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample() -> XattrBlock {
        let mut b = XattrBlock { refcount: 1, entries: Vec::new() };
        b.upsert(Namespace::User, b"zeta", b"1");
        b.upsert(Namespace::Trusted, b"a", b"two");
        b.upsert(Namespace::User, b"ab", b"");
        b.upsert(Namespace::User, b"alpha", b"a longer value");
        b
    }

    #[test]
    fn test_entries_kept_sorted() {
        let b = sample();
        let keys: Vec<_> = b.entries.iter().map(|e| (e.ns, e.name.as_slice())).collect();
        assert_eq!(
            keys,
            vec![
                (Namespace::User, &b"ab"[..]),
                (Namespace::User, &b"zeta"[..]),
                (Namespace::User, &b"alpha"[..]),
                (Namespace::Trusted, &b"a"[..]),
            ]
        );
    }

    #[test]
    fn test_encode_decode_block() {
        let b = sample();
        let mut buf = vec![0u8; 1024];
        b.encode(&mut buf).unwrap();
        assert_eq!(read_refcount(&buf).unwrap(), 1);

        let back = XattrBlock::decode(&buf).unwrap();
        assert_eq!(back.entries, b.entries);
        assert_eq!(back.find(Namespace::User, b"alpha").unwrap().value, b"a longer value");
        assert!(back.find(Namespace::Security, b"alpha").is_none());
    }

    #[test]
    fn test_overflow_is_no_space() {
        let mut b = XattrBlock { refcount: 1, entries: Vec::new() };
        // 头部 32 + 条目 20 + 值 900 + 结束标记 4
        b.upsert(Namespace::User, b"big", &[7u8; 900]);
        let mut buf = vec![0u8; 1024];
        b.encode(&mut buf).unwrap();
        assert_eq!(XattrBlock::decode(&buf).unwrap().entries.len(), 1);
        b.upsert(Namespace::User, b"more", &[1u8; 100]);
        assert_eq!(b.encode(&mut buf).unwrap_err().kind(), ErrorKind::NoSpace);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let buf = vec![0u8; 1024];
        assert_eq!(XattrBlock::decode(&buf).unwrap_err().kind(), ErrorKind::Corrupted);

        let mut buf = vec![0u8; 1024];
        sample().encode(&mut buf).unwrap();
        // 第一个条目的值偏移指向块外
        LittleEndian::write_u16(&mut buf[EXT2_XATTR_HEADER_SIZE + 2..EXT2_XATTR_HEADER_SIZE + 4], 1020);
        LittleEndian::write_u32(&mut buf[EXT2_XATTR_HEADER_SIZE + 8..EXT2_XATTR_HEADER_SIZE + 12], 64);
        assert_eq!(XattrBlock::decode(&buf).unwrap_err().kind(), ErrorKind::Corrupted);
    }
}
