//! File operations through the public API.

mod common;

use norfs::{Error, OpenFlags, RecoveryPolicy, SeekFrom};

use common::RamVolume;

fn mounted() -> anyhow::Result<RamVolume> {
    let mut volume = common::small_volume()?;
    volume.mount_or_format(RecoveryPolicy::default())?;
    Ok(volume)
}

fn write_file(volume: &mut RamVolume, name: &str, data: &[u8]) -> anyhow::Result<()> {
    let mut file = volume.open(name, OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNC)?;
    file.write(data)?;
    file.close()?;
    Ok(())
}

fn read_file(volume: &mut RamVolume, name: &str) -> anyhow::Result<Vec<u8>> {
    let mut file = volume.open(name, OpenFlags::READ)?;
    let mut data = vec![0u8; file.len()? as usize];
    let n = file.read_to_fill(&mut data)?;
    data.truncate(n);
    file.close()?;
    Ok(data)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

#[test]
fn test_write_read_across_reboot() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    write_file(&mut volume, "config", b"baud=115200")?;
    write_file(&mut volume, "empty", b"")?;

    volume = common::reboot(volume)?;
    volume.mount()?;
    assert_eq!(read_file(&mut volume, "config")?, b"baud=115200");
    assert_eq!(read_file(&mut volume, "empty")?, b"");
    assert!(volume.metadata("empty")?.is_empty());
    Ok(())
}

#[test]
fn test_multi_block_file() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    let data = pattern(3 * 4092 + 100);
    write_file(&mut volume, "blob", &data)?;
    assert_eq!(volume.used_blocks()?, 4 + 4);

    volume = common::reboot(volume)?;
    volume.mount()?;
    assert_eq!(read_file(&mut volume, "blob")?, data);

    // Read from the middle, across a block boundary
    let mut file = volume.open("blob", OpenFlags::READ)?;
    file.seek(SeekFrom::Start(4090))?;
    let mut window = [0u8; 6];
    assert_eq!(file.read_to_fill(&mut window)?, 6);
    assert_eq!(window, data[4090..4096]);
    file.close()?;
    Ok(())
}

#[test]
fn test_rewrite_in_chunks() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    let data = pattern(10_000);
    let mut file = volume.open("chunks", OpenFlags::READ_WRITE | OpenFlags::CREATE)?;
    for chunk in data.chunks(333) {
        file.write(chunk)?;
    }
    file.sync()?;
    file.seek(SeekFrom::Start(5000))?;
    file.write(b"MARK")?;
    file.close()?;

    let mut expected = data;
    expected[5000..5004].copy_from_slice(b"MARK");
    assert_eq!(read_file(&mut volume, "chunks")?, expected);
    Ok(())
}

#[test]
fn test_append() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    write_file(&mut volume, "log", b"one")?;
    for line in [&b",two"[..], b",three"] {
        let mut file = volume.open("log", OpenFlags::WRITE | OpenFlags::APPEND)?;
        file.seek(SeekFrom::Start(0))?;
        file.write(line)?;
        file.close()?;
    }
    assert_eq!(read_file(&mut volume, "log")?, b"one,two,three");
    Ok(())
}

#[test]
fn test_remove_frees_blocks() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    let before = volume.used_blocks()?;
    write_file(&mut volume, "tmp", &pattern(9000))?;
    assert_eq!(volume.used_blocks()?, before + 3);

    volume.remove("tmp")?;
    assert!(!volume.exists("tmp")?);
    assert_eq!(volume.used_blocks()?, before);
    assert_eq!(volume.remove("tmp"), Err(Error::NotFound));
    Ok(())
}

#[test]
fn test_open_errors() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    assert!(matches!(volume.open("missing", OpenFlags::READ), Err(Error::NotFound)));
    assert!(matches!(
        volume.open("a-name-that-is-much-too-long-for-norfs", OpenFlags::READ),
        Err(Error::NameTooLong)
    ));
    assert!(matches!(volume.open("dir/file", OpenFlags::READ), Err(Error::Invalid)));
    assert!(matches!(volume.open("x", OpenFlags::CREATE), Err(Error::Invalid)));

    write_file(&mut volume, "x", b"1")?;
    let exclusive = OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::EXCL;
    assert!(matches!(volume.open("x", exclusive), Err(Error::Exists)));
    volume.open("y", exclusive)?.close()?;
    Ok(())
}

#[test]
fn test_truncate_on_open() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    write_file(&mut volume, "t", b"hello")?;
    volume.open("t", OpenFlags::WRITE | OpenFlags::TRUNC)?.close()?;
    assert_eq!(volume.metadata("t")?.len(), 0);
    Ok(())
}

#[test]
fn test_drop_discards_changes() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    write_file(&mut volume, "keep", b"original")?;

    let mut file = volume.open("keep", OpenFlags::WRITE | OpenFlags::TRUNC)?;
    file.write(b"replacement that never lands")?;
    drop(file);

    assert_eq!(read_file(&mut volume, "keep")?, b"original");
    volume = common::reboot(volume)?;
    volume.mount()?;
    assert_eq!(read_file(&mut volume, "keep")?, b"original");
    Ok(())
}

#[test]
fn test_full_volume_reports_no_space() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    write_file(&mut volume, "small", b"survives")?;

    // 12 free blocks hold less than this
    let mut file = volume.open("huge", OpenFlags::WRITE | OpenFlags::CREATE)?;
    assert_eq!(file.write(&pattern(60_000)), Err(Error::NoSpace));
    drop(file);

    assert_eq!(volume.metadata("huge")?.len(), 0);
    assert_eq!(read_file(&mut volume, "small")?, b"survives");
    write_file(&mut volume, "after", &pattern(5000))?;
    assert_eq!(read_file(&mut volume, "after")?, pattern(5000));
    Ok(())
}

#[test]
fn test_list_reports_every_file() -> anyhow::Result<()> {
    let mut volume = mounted()?;
    for (name, len) in [("a", 1usize), ("b", 20), ("c", 300)] {
        write_file(&mut volume, name, &pattern(len))?;
    }
    volume.remove("b")?;
    write_file(&mut volume, "a", &pattern(2))?;

    let mut files = Vec::new();
    volume.list(|meta| files.push((meta.name().to_owned(), meta.len())))?;
    files.sort();
    assert_eq!(files, [("a".to_owned(), 2), ("c".to_owned(), 300)]);
    Ok(())
}
