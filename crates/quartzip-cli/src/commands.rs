//! Subcommand implementations.

use std::fs;
use std::path::{Path, PathBuf};

use quartzip_core::{Session, SessionParams, Status, gzip, max_compressed_length};

/// Output sizing retry cap for streams whose decoded size is unknown.
const MAX_GROW_ROUNDS: u32 = 8;

pub fn compress(
    file: &Path,
    output: Option<PathBuf>,
    level: u32,
    block_kib: Option<u32>,
) -> Result<(), String> {
    let data = fs::read(file).map_err(|e| format!("{}: {e}", file.display()))?;

    let mut params = SessionParams::default();
    params.comp_lvl = level;
    if let Some(kib) = block_kib {
        params.hw_buff_sz = kib.saturating_mul(1024);
    }

    let mut sess = Session::new();
    if sess.setup(Some(&params)) == Status::Params {
        return Err("invalid parameters (level 1-9, block size a power of two)".into());
    }

    let mut framed = vec![0u8; max_compressed_length(data.len()).max(64)];
    let out = sess.compress(&data, &mut framed, true);
    if !out.status.is_ok() {
        return Err(format!("compress failed: {}", out.status));
    }
    framed.truncate(out.produced);

    let output = output.unwrap_or_else(|| {
        let mut p = file.as_os_str().to_owned();
        p.push(".qz");
        PathBuf::from(p)
    });
    fs::write(&output, &framed).map_err(|e| format!("{}: {e}", output.display()))?;

    log::info!(
        "{} -> {} ({} -> {} bytes)",
        file.display(),
        output.display(),
        out.consumed,
        out.produced
    );
    Ok(())
}

pub fn decompress(file: &Path, output: Option<PathBuf>) -> Result<(), String> {
    let stream = fs::read(file).map_err(|e| format!("{}: {e}", file.display()))?;

    let mut sess = Session::new();
    let mut dest = vec![0u8; initial_decode_budget(&stream)];
    let mut rounds = 0;
    let out = loop {
        let out = sess.decompress(&stream, &mut dest);
        if out.status != Status::BufError {
            break out;
        }
        rounds += 1;
        if rounds > MAX_GROW_ROUNDS {
            return Err("decompress failed: output keeps outgrowing the budget".into());
        }
        dest = vec![0u8; dest.len() * 2];
    };
    if !out.status.is_ok() {
        return Err(format!("decompress failed: {}", out.status));
    }
    dest.truncate(out.produced);

    let output = match output {
        Some(p) => p,
        None => default_decompress_output(file)?,
    };
    fs::write(&output, &dest).map_err(|e| format!("{}: {e}", output.display()))?;

    log::info!(
        "{} -> {} ({} -> {} bytes)",
        file.display(),
        output.display(),
        out.consumed,
        out.produced
    );
    Ok(())
}

pub fn info(json: bool) -> Result<(), String> {
    let report = quartzip_core::report();
    let defaults = quartzip_core::get_defaults();

    if json {
        let doc = serde_json::json!({
            "version": quartzip_core::VERSION,
            "pool": report,
            "defaults": defaults,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).map_err(|e| e.to_string())?
        );
        return Ok(());
    }

    println!("quartzip {}", quartzip_core::VERSION);
    println!(
        "pool: {} ({} instance(s), status {})",
        if report.initialized { "initialized" } else { "not initialized" },
        report.instances.len(),
        report.status
    );
    for (i, inst) in report.instances.iter().enumerate() {
        println!(
            "  instance {i}: node {} package {} {}{}",
            inst.node_id,
            inst.package_id,
            if inst.busy { "busy" } else { "free" },
            if inst.mem_setup { ", rings ready" } else { "" }
        );
    }
    println!(
        "defaults: level {}, block {} KiB, offload threshold {} B, thread threshold {} reqs",
        defaults.comp_lvl,
        defaults.hw_buff_sz / 1024,
        defaults.input_sz_thrshold,
        defaults.req_cnt_thrshold
    );
    Ok(())
}

/// Sum the framed members' original lengths; fall back to a multiple of
/// the stream size for standard gzip, then grow on BUF_ERROR.
fn initial_decode_budget(stream: &[u8]) -> usize {
    let mut total = 0usize;
    let mut at = 0usize;
    while at < stream.len() {
        match gzip::parse_header(&stream[at..]) {
            Ok(gzip::Header::Framed(h)) => {
                total += h.original_len as usize;
                at += gzip::HEADER_SZ + h.compressed_len as usize + gzip::FOOTER_SZ;
            }
            _ => return (stream.len().max(16)) * 4,
        }
    }
    total.max(1)
}

fn default_decompress_output(file: &Path) -> Result<PathBuf, String> {
    match file.extension() {
        Some(ext) if ext == "qz" || ext == "gz" => Ok(file.with_extension("")),
        _ => Err("cannot infer output name; pass --output".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_decompress_output() {
        assert_eq!(
            default_decompress_output(Path::new("data.bin.qz")).unwrap(),
            PathBuf::from("data.bin")
        );
        assert!(default_decompress_output(Path::new("data.bin")).is_err());
    }

    #[test]
    fn test_initial_decode_budget_framed() {
        let mut sess = Session::new();
        let data = vec![3u8; 5000];
        let mut framed = vec![0u8; max_compressed_length(data.len())];
        let out = sess.compress(&data, &mut framed, true);
        assert!(out.status.is_ok());
        framed.truncate(out.produced);
        assert_eq!(initial_decode_budget(&framed), data.len());
    }

    #[test]
    fn test_round_trip_via_files() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("payload.bin");
        let data: Vec<u8> = (0u32..20_000).map(|i| (i % 240) as u8).collect();
        let mut f = fs::File::create(&input).unwrap();
        f.write_all(&data).unwrap();
        drop(f);

        compress(&input, None, 1, None).unwrap();
        let packed = dir.path().join("payload.bin.qz");
        assert!(packed.exists());

        let restored = dir.path().join("restored.bin");
        decompress(&packed, Some(restored.clone())).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), data);
    }
}
