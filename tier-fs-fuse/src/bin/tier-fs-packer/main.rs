mod cli;

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use tier_fs::{Config, FreeMap, Node, SECTOR_SIZE, TierFileSystem};
use tier_fs_fuse::BlockFile;
use typed_bytesize::ByteSizeIec;

/// 可执行文件在镜像中的目录
const BIN_DIR: &str = "/bin";

fn main() -> io::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Command::Pack {
            source,
            target,
            out_dir,
            size,
        } => pack(&source, &target, &out_dir, size),
        Command::Ls { image, path } => ls(&image, &path),
        Command::Cat { image, path } => cat(&image, &path),
    }
}

fn pack(source: &Path, target: &Path, out_dir: &Path, size: u64) -> io::Result<()> {
    println!("source={source:?}\ntarget={target:?}");

    let disk_size = ByteSizeIec::mib(size).0;
    let block_file = Arc::new(BlockFile::create(out_dir.join("fs.img"), disk_size)?);
    let sectors = disk_size as usize / SECTOR_SIZE;

    let fs = TierFileSystem::format(
        block_file,
        Arc::new(FreeMap::new(sectors)),
        Config::default(),
    )
    .map_err(to_io)?;
    fs.create(BIN_DIR, 0, true, None).map_err(to_io)?;

    let apps = fs::read_dir(source)?
        .map(|app| {
            app.map(|app| {
                app.file_name()
                    .to_str()
                    .and_then(|fname| fname.split_once('.'))
                    .expect("source file name doesn't match `*.rs`")
                    .0
                    .to_owned()
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    for app in apps {
        log::info!("app={app:?}");
        let mut host_file = File::open(target.join(&app))?;
        let mut elf_data: Vec<u8> = Vec::new();
        host_file.read_to_end(&mut elf_data)?;

        let path = format!("{BIN_DIR}/{app}");
        fs.create(&path, elf_data.len(), false, None)
            .map_err(to_io)?;
        let Node::File(file) = fs.open(&path, false, None).map_err(to_io)? else {
            unreachable!("{path} was created as a file");
        };
        if file.write_at(0, &elf_data) != elf_data.len() {
            return Err(io::Error::other(format!("short write to {path}")));
        }
    }

    fs.sync();
    Ok(())
}

fn ls(image: &Path, path: &str) -> io::Result<()> {
    let fs = mount(image)?;
    let Node::Dir(dir) = fs.open(path, true, None).map_err(to_io)? else {
        return Err(to_io(vfs::Error::NotADirectory));
    };

    for entry in dir.entries() {
        let node = fs
            .open(&format!("{}/{}", path.trim_end_matches('/'), entry.name), true, None)
            .map_err(to_io)?;
        let len = match &node {
            Node::File(file) => file.len(),
            Node::Dir(dir) => dir.inode().len(),
        };
        println!("{:>6} {:?} {:>10} {}", entry.inode, entry.ty, len, entry.name);
    }
    Ok(())
}

fn cat(image: &Path, path: &str) -> io::Result<()> {
    let fs = mount(image)?;
    let Node::File(mut file) = fs.open(path, false, None).map_err(to_io)? else {
        return Err(to_io(vfs::Error::IsADirectory));
    };

    let mut stdout = io::stdout().lock();
    let mut buf = [0; 4 * SECTOR_SIZE];
    loop {
        let read = file.read(&mut buf);
        if read == 0 {
            break;
        }
        stdout.write_all(&buf[..read])?;
    }
    Ok(())
}

/// 只读挂载：空闲位图不在镜像中持久化，分配一律失败
fn mount(image: &Path) -> io::Result<Arc<TierFileSystem>> {
    let block_file = Arc::new(BlockFile::open(image)?);
    let sectors = tier_fs::BlockDevice::num_blocks(block_file.as_ref());

    let fs = TierFileSystem::mount(
        block_file,
        Arc::new(FreeMap::exhausted(sectors)),
        Config::default(),
    )
    .map_err(to_io)?;
    tier_fs_fuse::spawn_read_ahead(&fs);
    Ok(fs)
}

fn to_io(err: vfs::Error) -> io::Error {
    io::Error::other(err.to_string())
}
