
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tier_fs::{BlockDevice, SECTOR_SIZE, TierFileSystem};

/// 以宿主机上的镜像文件充当块设备
#[derive(Debug)]
pub struct BlockFile(pub Mutex<File>);

impl BlockFile {
    /// 新建（或截断）`size` 字节的镜像
    pub fn create(path: impl AsRef<Path>, size: u64) -> io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        fd.set_len(size)?;
        Ok(Self(Mutex::new(fd)))
    }

    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(fd)))
    }
}

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * SECTOR_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }

    fn num_blocks(&self) -> usize {
        let file = self.0.lock().unwrap();
        let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);
        len as usize / SECTOR_SIZE
    }
}

/// 启动预读线程。
///
/// 线程平时休眠，块缓存投递预读请求时被唤醒；文件系统被释放后自行退出。
pub fn spawn_read_ahead(fs: &Arc<TierFileSystem>) -> JoinHandle<()> {
    let weak: Weak<TierFileSystem> = Arc::downgrade(fs);
    let worker = thread::Builder::new()
        .name("read-ahead".into())
        .spawn(move || {
            loop {
                thread::park_timeout(Duration::from_millis(100));
                let Some(fs) = weak.upgrade() else {
                    break;
                };
                while fs.cache().pump_read_ahead() {}
            }
            log::debug!("read-ahead worker exits");
        })
        .expect("spawn read-ahead worker");

    let waker = worker.thread().clone();
    fs.cache().enable_read_ahead(move || waker.unpark());
    worker
}

/// 后台写回的默认周期
pub const WRITE_BEHIND_PERIOD: Duration = Duration::from_secs(1);

/// 启动后台写回线程。
///
/// 每隔 `period` 把块缓存中的脏扇区写回镜像，文件系统被释放后自行退出。
pub fn spawn_write_behind(fs: &Arc<TierFileSystem>, period: Duration) -> JoinHandle<()> {
    let weak: Weak<TierFileSystem> = Arc::downgrade(fs);
    thread::Builder::new()
        .name("write-behind".into())
        .spawn(move || {
            loop {
                thread::sleep(period);
                let Some(fs) = weak.upgrade() else {
                    break;
                };
                fs.sync();
            }
            log::debug!("write-behind worker exits");
        })
        .expect("spawn write-behind worker")
}
