use std::env;
use std::io::{Seek, SeekFrom};

use inodefs::syscall::{sys_mkdir, sys_open};
use inodefs::{FileSystem, FsConfig, OpenFlags, Process};

pub fn main() {
    let paths: Vec<String> = env::args().skip(1).collect();
    let fs = FileSystem::format(FsConfig::default()).expect("could not format filesystem");
    let mut proc = Process::root();

    for path in &paths {
        let ret = if path.ends_with('/') {
            sys_mkdir(&fs, &mut proc, path, 0o755)
        } else {
            let flags = (OpenFlags::CREAT | OpenFlags::WRONLY).bits();
            sys_open(&fs, &mut proc, path, flags, 0o644)
        };
        println!("{} -> {}", path, ret);
    }

    let mut image = tempfile::tempfile().unwrap();
    fs.save(&image).expect("could not save image");
    image.seek(SeekFrom::Start(0)).unwrap();
    let reloaded = FileSystem::load(&image, FsConfig::default());
    println!("image reloads: {}", reloaded.is_ok());
}
