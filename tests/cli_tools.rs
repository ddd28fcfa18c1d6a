//! End-to-end tests driving the built tool binaries

use base64::{engine::general_purpose::STANDARD, Engine};
use dmcache_tools::cache::CacheMetadata;
use dmcache_tools::core::io::FileBlockIo;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Command, Output};
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};

const RESTORE: &str = env!("CARGO_BIN_EXE_cache_restore");
const DUMP: &str = env!("CARGO_BIN_EXE_cache_dump");
const REPAIR: &str = env!("CARGO_BIN_EXE_cache_repair");
const CHECK: &str = env!("CARGO_BIN_EXE_cache_check");
const SIZE: &str = env!("CARGO_BIN_EXE_cache_metadata_size");

fn run(bin: &str, args: &[&str]) -> Output {
    Command::new(bin)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8(output.stderr.clone()).unwrap()
}

fn device(dir: &TempDir, name: &str, nr_blocks: u64) -> String {
    let path = dir.path().join(name);
    File::create(&path).unwrap().set_len(nr_blocks * 4096).unwrap();
    path.to_str().unwrap().to_string()
}

/// Random but reproducible metadata description
fn generate_xml(seed: u64, nr_cache_blocks: u32) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut cblocks = BTreeSet::new();
    while cblocks.len() < (nr_cache_blocks / 4) as usize {
        cblocks.insert(rng.gen_range(0..nr_cache_blocks));
    }

    let mut xml = String::new();
    writeln!(
        xml,
        r#"<superblock uuid="" block_size="128" nr_cache_blocks="{}" policy="smq" hint_width="4">"#,
        nr_cache_blocks
    )
    .unwrap();
    xml.push_str("  <mappings>\n");
    for (i, cblock) in cblocks.iter().enumerate() {
        writeln!(
            xml,
            r#"    <mapping cache_block="{}" origin_block="{}" dirty="{}"/>"#,
            cblock,
            i * 3 + 1,
            rng.gen_bool(0.5)
        )
        .unwrap();
    }
    xml.push_str("  </mappings>\n  <hints>\n");
    for cblock in &cblocks {
        let data: [u8; 4] = rng.gen();
        writeln!(
            xml,
            r#"    <hint cache_block="{}" data="{}"/>"#,
            cblock,
            STANDARD.encode(data)
        )
        .unwrap();
    }
    xml.push_str("  </hints>\n</superblock>\n");
    xml
}

fn write_xml(dir: &TempDir, name: &str, xml: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, xml).unwrap();
    path.to_str().unwrap().to_string()
}

fn corrupt_block(path: &str, block: u64) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(block * 4096 + 64)).unwrap();
    file.write_all(&[0xff; 64]).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn test_metadata_size_known_values() {
    let out = run(SIZE, &["--nr-blocks", "1024"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "8248 sectors\n");

    let out = run(SIZE, &["--nr-blocks", "67108864"]);
    assert_eq!(stdout(&out), "3678208 sectors\n");

    let out = run(SIZE, &["--device-size", "102400", "--block-size", "100"]);
    assert_eq!(stdout(&out), "8248 sectors\n");
}

#[test]
fn test_metadata_size_bad_arguments() {
    let out = run(SIZE, &[]);
    assert!(!out.status.success());
    assert!(stderr(&out)
        .contains("Please specify either --device-size and --block-size, or --nr-blocks."));

    let out = run(SIZE, &["--device-size", "102400"]);
    assert!(stderr(&out).contains("If you specify --device-size you must also give --block-size."));

    let out = run(SIZE, &["--block-size", "100"]);
    assert!(stderr(&out).contains("If you specify --block-size you must also give --device-size."));

    let out = run(
        SIZE,
        &["--device-size", "102400", "--block-size", "100", "--nr-blocks", "6"],
    );
    assert!(stderr(&out).contains("Contradictory arguments given"));
}

#[test]
fn test_help_and_version() {
    for bin in [RESTORE, DUMP, REPAIR, CHECK, SIZE] {
        let out = run(bin, &["--help"]);
        assert!(out.status.success(), "{} --help", bin);
        assert!(stdout(&out).contains("Usage"));

        let out = run(bin, &["--version"]);
        assert!(out.status.success(), "{} --version", bin);
        assert!(stdout(&out).contains(dmcache_tools::VERSION));
    }
}

#[test]
fn test_restore_missing_arguments() {
    let dir = TempDir::new().unwrap();
    let xml = write_xml(&dir, "in.xml", &generate_xml(1, 64));
    let dev = device(&dir, "meta", 16);

    let out = run(RESTORE, &["-o", &dev]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("No input file provided."));

    let out = run(RESTORE, &["-i", &xml]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("No output file provided."));

    let missing = dir.path().join("missing.xml");
    let missing = missing.to_str().unwrap();
    let out = run(RESTORE, &["-i", missing, "-o", &dev]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains(&format!("Couldn't stat file {}", missing)));
}

#[test]
fn test_restore_into_tiny_output_stays_zeroed() {
    let dir = TempDir::new().unwrap();
    let xml = write_xml(&dir, "in.xml", &generate_xml(2, 64));

    let mut tiny = NamedTempFile::new().unwrap();
    tiny.write_all(&[0xee; 1000]).unwrap();
    let tiny_path = tiny.path().to_str().unwrap();

    let out = run(RESTORE, &["-i", &xml, "-o", tiny_path]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Output file too small."));
    assert_eq!(std::fs::read(tiny.path()).unwrap(), vec![0; 1000]);
}

#[test]
fn test_restore_bad_xml_leaves_superblock_zeroed() {
    let dir = TempDir::new().unwrap();
    let xml = write_xml(&dir, "in.xml", "<superblock uuid=\"\" block_size=\"128\">\n");
    let dev = device(&dir, "meta", 16);
    std::fs::write(&dev, vec![0x55; 16 * 4096]).unwrap();

    let out = run(RESTORE, &["-i", &xml, "-o", &dev]);
    assert!(!out.status.success());

    let contents = std::fs::read(&dev).unwrap();
    assert!(contents[..4096].iter().all(|&b| b == 0));
}

#[test]
fn test_dump_restore_dump_identical() {
    for nr_cache_blocks in [128u32, 3000] {
        let dir = TempDir::new().unwrap();
        let xml = write_xml(&dir, "in.xml", &generate_xml(3, nr_cache_blocks));
        let first_dev = device(&dir, "meta1", 64);
        let second_dev = device(&dir, "meta2", 64);

        assert!(run(RESTORE, &["-i", &xml, "-o", &first_dev]).status.success());
        let first = run(DUMP, &[&first_dev]);
        assert!(first.status.success(), "{}", stderr(&first));

        let dumped = write_xml(&dir, "dumped.xml", &stdout(&first));
        assert!(run(RESTORE, &["-i", &dumped, "-o", &second_dev]).status.success());
        let second = run(DUMP, &[&second_dev]);

        assert_eq!(stdout(&first), stdout(&second));
        assert_eq!(
            stdout(&first).matches("<mapping ").count(),
            (nr_cache_blocks / 4) as usize
        );
    }
}

#[test]
fn test_quiet_restore_is_silent() {
    let dir = TempDir::new().unwrap();
    let xml = write_xml(&dir, "in.xml", &generate_xml(6, 128));
    let dev = device(&dir, "meta", 16);

    let out = run(RESTORE, &["-q", "-i", &xml, "-o", &dev]);
    assert!(out.status.success());
    assert!(out.stdout.is_empty());
    assert!(out.stderr.is_empty());
}

#[test]
fn test_dump_tiny_device() {
    let mut tiny = NamedTempFile::new().unwrap();
    tiny.write_all(&[0; 100]).unwrap();

    let out = run(DUMP, &[tiny.path().to_str().unwrap()]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Metadata device too small."));
}

fn hint_leaves(dev: &str) -> Vec<u64> {
    let io = Arc::new(FileBlockIo::open(Path::new(dev), false).unwrap());
    let md = CacheMetadata::open_read_only(io).unwrap();
    md.hints().unwrap().array().blocks(md.tm()).unwrap()
}

#[test]
fn test_check_and_repair_damaged_hints() {
    let dir = TempDir::new().unwrap();
    let xml = write_xml(&dir, "in.xml", &generate_xml(4, 3000));
    let damaged = device(&dir, "damaged", 64);
    let repaired = device(&dir, "repaired", 64);

    assert!(run(RESTORE, &["-i", &xml, "-o", &damaged]).status.success());
    assert!(run(CHECK, &[&damaged]).status.success());

    // root first; the second leaf holds hints for cache blocks 1016..2032
    corrupt_block(&damaged, hint_leaves(&damaged)[2]);

    let out = run(CHECK, &[&damaged]);
    assert!(!out.status.success());
    assert!(stdout(&out).contains("missing hints"));

    let out = run(DUMP, &[&damaged]);
    assert!(!out.status.success());

    let out = run(REPAIR, &["-i", &damaged, "-o", &repaired]);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(run(CHECK, &[&repaired]).status.success());

    let dumped = stdout(&run(DUMP, &[&repaired]));
    let original = generate_xml(4, 3000);
    assert_eq!(
        dumped.matches("<mapping ").count(),
        original.matches("<mapping ").count()
    );
    for line in dumped.lines().filter(|l| l.contains("<hint ")) {
        let cblock: u32 = line
            .split('"')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap();
        if (1016..2032).contains(&cblock) {
            assert!(line.contains(r#"data="AAAAAA==""#), "{}", line);
        } else {
            assert!(original.contains(line.trim()), "{}", line);
        }
    }
}

#[test]
fn test_repair_missing_paths() {
    let dir = TempDir::new().unwrap();
    let dev = device(&dir, "meta", 16);
    let missing = dir.path().join("nope");
    let missing = missing.to_str().unwrap();

    let out = run(REPAIR, &["-i", missing, "-o", &dev]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains(&format!("Couldn't stat path {}", missing)));

    let out = run(REPAIR, &["-i", &dev, "-o", missing]);
    assert!(stderr(&out).contains(&format!("Couldn't stat path {}", missing)));
}

#[test]
fn test_check_json_report() {
    let dir = TempDir::new().unwrap();
    let xml = write_xml(&dir, "in.xml", &generate_xml(5, 100));
    let dev = device(&dir, "meta", 16);
    assert!(run(RESTORE, &["-i", &xml, "-o", &dev]).status.success());

    let out = run(CHECK, &["--json", &dev]);
    assert!(out.status.success());
    let report: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(report["cache_blocks"], 100);
    assert_eq!(report["policy"], "smq");
    assert!(report["damage"].as_array().unwrap().is_empty());
}
