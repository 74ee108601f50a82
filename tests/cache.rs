use ext2_vfs_core::{BlockCache, BlockDev, BlockDevice, ErrorKind, MemBlockDevice, NullHal, Result};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

const READERS: u64 = 8;

/// 读取在闸门打开前一直阻塞的内存磁盘
struct GatedDevice {
    inner: MemBlockDevice,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

impl BlockDevice for GatedDevice {
    fn sector_size(&self) -> u32 {
        self.inner.sector_size()
    }

    fn total_sectors(&self) -> u64 {
        self.inner.total_sectors()
    }

    fn read_blocks(&mut self, lba: u64, count: u32, buf: &mut [u8]) -> Result<usize> {
        let (open, cv) = &*self.gate;
        let mut open = open.lock().unwrap();
        while !*open {
            open = cv.wait(open).unwrap();
        }
        drop(open);
        self.inner.read_blocks(lba, count, buf)
    }

    fn write_blocks(&mut self, lba: u64, count: u32, buf: &[u8]) -> Result<usize> {
        self.inner.write_blocks(lba, count, buf)
    }
}

struct Rig {
    cache: Arc<BlockCache>,
    bdev: Arc<BlockDev>,
    ram: MemBlockDevice,
    gate: Arc<(Mutex<bool>, Condvar)>,
}

fn rig() -> Rig {
    let mut ram = MemBlockDevice::new(64 * 1024);
    ram.write_blocks(6, 2, &[0xA5u8; 1024]).unwrap();
    let gate = Arc::new((Mutex::new(false), Condvar::new()));
    let dev = GatedDevice { inner: ram.clone(), gate: gate.clone() };
    let bdev = Arc::new(BlockDev::new(1, Box::new(dev)).unwrap());
    let cache = Arc::new(BlockCache::new(8, Arc::new(NullHal)));
    cache.register_device(bdev.clone());
    Rig { cache, bdev, ram, gate }
}

fn open_gate(gate: &(Mutex<bool>, Condvar)) {
    *gate.0.lock().unwrap() = true;
    gate.1.notify_all();
}

/// 并发读取同一块，等到全部调用者进入缓存后再放行设备
fn concurrent_reads(rig: &Rig) -> Vec<std::result::Result<u8, ErrorKind>> {
    let handles: Vec<_> = (0..READERS)
        .map(|_| {
            let cache = rig.cache.clone();
            thread::spawn(move || match cache.get(1, 3, 1024) {
                Ok(b) => Ok(b.with_data(|d| d[17])),
                Err(e) => Err(e.kind()),
            })
        })
        .collect();

    // 一次未命中，其余调用者全部作为命中在等待读取完成
    let mut spins = 0;
    loop {
        let stats = rig.cache.stats();
        if stats.misses == 1 && stats.hits == READERS - 1 {
            break;
        }
        spins += 1;
        assert!(spins < 10_000, "readers never reached the cache: {:?}", stats);
        thread::sleep(Duration::from_millis(1));
    }
    open_gate(&rig.gate);

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_concurrent_gets_share_one_read() {
    let rig = rig();
    let results = concurrent_reads(&rig);

    assert_eq!(rig.bdev.physical_read_count(), 1);
    assert!(results.iter().all(|r| *r == Ok(0xA5)), "{:?}", results);
    let stats = rig.cache.stats();
    assert_eq!((stats.misses, stats.hits, stats.used), (1, READERS - 1, 1));
}

#[test]
fn test_concurrent_waiters_share_read_error() {
    let rig = rig();
    rig.ram.faults().fail_read_after(0);
    let results = concurrent_reads(&rig);

    assert_eq!(rig.bdev.physical_read_count(), 1);
    assert!(results.iter().all(|r| *r == Err(ErrorKind::Io)), "{:?}", results);
    assert_eq!(rig.cache.stats().read_errors, 1);

    // 失败状态保持到驱逐为止，期间不再访问设备
    assert!(matches!(rig.cache.get(1, 3, 1024), Err(e) if e.kind() == ErrorKind::Io));
    assert_eq!(rig.bdev.physical_read_count(), 1);
    rig.cache.evict(1, 3).unwrap();
    let b = rig.cache.get(1, 3, 1024).unwrap();
    assert_eq!(b.with_data(|d| d[17]), 0xA5);
    assert_eq!(rig.bdev.physical_read_count(), 2);
}
