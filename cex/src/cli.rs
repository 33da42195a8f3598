//! `cex` CLI — command dispatch for the `cex` binary.
//!
//! ```text
//! cex keygen   --output <dir> [--count N]
//! cex encrypt  --package <file> --index <i> --in <file> --out <file>
//! cex decrypt  --package <file> --index <i> --in <file> --out <file>
//! cex inspect  --package <file>
//! cex demo-exchange
//! ```
//!
//! Argument handling follows the teacher's manual `parse_args`/`get_flag`/
//! `require_flag` pattern rather than pulling in a dedicated argument-
//! parsing crate — there is no other user of that crate in this workspace,
//! and the command surface here is small enough not to need one.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use cex_keystore::storage;
use cex_protocol::Role;

use crate::sdk::{self, CipherEngine, KeyVault};

fn die(msg: impl std::fmt::Display) -> ! {
    eprintln!("error: {msg}");
    std::process::exit(1);
}

fn usage() {
    eprintln!(
        "cex — parallel symmetric-cipher engine + DTM-KEX (v{})\n\
         \n\
         USAGE:\n\
         \x20   cex keygen   --output <dir> [--count N]\n\
         \x20   cex encrypt  --package <file> --index <i> --in <file> --out <file>\n\
         \x20   cex decrypt  --package <file> --index <i> --in <file> --out <file>\n\
         \x20   cex inspect  --package <file>\n\
         \x20   cex demo-exchange\n",
        sdk::VERSION
    );
}

fn parse_args(args: &[String]) -> Vec<(String, String)> {
    let mut flags = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i].starts_with("--") && i + 1 < args.len() {
            flags.push((args[i].clone(), args[i + 1].clone()));
            i += 2;
        } else {
            die(format!("unexpected argument: {}", args[i]));
        }
    }
    flags
}

fn get_flag(flags: &[(String, String)], name: &str) -> Option<String> {
    flags.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
}

fn require_flag(flags: &[(String, String)], name: &str) -> String {
    get_flag(flags, name).unwrap_or_else(|| die(format!("missing required flag: {name}")))
}

/// Entry point called by `src/bin/cex.rs`. Returns the process exit code.
pub fn run() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
        return ExitCode::FAILURE;
    }

    match args[1].as_str() {
        "keygen" => cmd_keygen(&parse_args(&args[2..])),
        "encrypt" => cmd_transform(&parse_args(&args[2..]), true),
        "decrypt" => cmd_transform(&parse_args(&args[2..]), false),
        "inspect" => cmd_inspect(&parse_args(&args[2..])),
        "demo-exchange" => cmd_demo_exchange(),
        "--help" | "-h" => {
            usage();
            ExitCode::SUCCESS
        }
        "--version" | "-V" => {
            println!("cex {}", sdk::VERSION);
            ExitCode::SUCCESS
        }
        cmd => {
            eprintln!("unknown command: {cmd}");
            usage();
            ExitCode::FAILURE
        }
    }
}

fn cmd_keygen(flags: &[(String, String)]) -> ExitCode {
    let output_dir = PathBuf::from(require_flag(flags, "--output"));
    let count: usize = get_flag(flags, "--count").map(|s| s.parse().unwrap_or_else(|_| die("--count must be an integer"))).unwrap_or(4);

    if let Err(e) = fs::create_dir_all(&output_dir) {
        die(format!("create {}: {e}", output_dir.display()));
    }
    let package_path = output_dir.join("package.bin");

    let vault = KeyVault::create(&package_path, sdk::aes256_ctr_description(), count).unwrap_or_else(|e| die(format!("keygen: {e}")));

    eprintln!("wrote {} subkeys to {}", count, vault.path().display());
    ExitCode::SUCCESS
}

fn cmd_transform(flags: &[(String, String)], is_encrypt: bool) -> ExitCode {
    let package_path = require_flag(flags, "--package");
    let index: u32 = require_flag(flags, "--index").parse().unwrap_or_else(|_| die("--index must be an integer"));
    let in_path = require_flag(flags, "--in");
    let out_path = require_flag(flags, "--out");

    let vault = KeyVault::open(&package_path);
    let subkey = vault.read_at(index).unwrap_or_else(|e| die(format!("read subkey {index}: {e}")));

    let engine = CipherEngine::new(subkey.description).unwrap_or_else(|e| die(format!("unsupported cipher description: {e}")));
    let input = fs::read(&in_path).unwrap_or_else(|e| die(format!("read {in_path}: {e}")));

    let output = if is_encrypt {
        engine.encrypt(&subkey.material, &input)
    } else {
        engine.decrypt(&subkey.material, &input)
    }
    .unwrap_or_else(|e| die(format!("transform failed: {e}")));

    fs::write(&out_path, &output).unwrap_or_else(|e| die(format!("write {out_path}: {e}")));
    eprintln!("{} {} bytes -> {} ({} bytes)", if is_encrypt { "encrypted" } else { "decrypted" }, input.len(), out_path, output.len());
    ExitCode::SUCCESS
}

fn cmd_inspect(flags: &[(String, String)]) -> ExitCode {
    let package_path = require_flag(flags, "--package");
    let mut file = storage::open(package_path.as_ref()).unwrap_or_else(|e| die(format!("open {package_path}: {e}")));
    let header = storage::read_header(&mut file).unwrap_or_else(|e| die(format!("read header: {e}")));

    println!("package:       {package_path}");
    println!("created:       {} (unix seconds)", header.created);
    println!("subkey count:  {}", header.entries.len());
    println!("cipher engine: {} (key_bits={})", header.description.engine, header.description.key_bits);
    for (i, entry) in header.entries.iter().enumerate() {
        println!(
            "  [{i}] id={} policy=0x{:x} active={} used={} expired={}",
            entry.id,
            entry.policy,
            entry.state.is_active(),
            entry.state.is_used(),
            entry.state.is_expired(),
        );
    }
    ExitCode::SUCCESS
}

/// Runs a full DTM-KEX handshake between an in-process initiator and
/// responder over a `tokio::io::duplex` pipe, then exchanges one
/// application message — a self-contained demonstration that needs no
/// network setup.
fn cmd_demo_exchange() -> ExitCode {
    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| die(format!("start runtime: {e}")));
    runtime.block_on(async {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let params = sdk::demo_parameters();
        let domain_secret = b"cex-cli-demo-domain-secret-32by".to_vec();

        let client_identity = cex_protocol::DtmIdentity {
            identity: b"initiator".to_vec(),
            pke_id: cex_primitives::PkeKind::HybridX25519MlKem768,
            session: params.auth_session,
            option_flag: 0,
        };
        let server_identity = cex_protocol::DtmIdentity {
            identity: b"responder".to_vec(),
            pke_id: cex_primitives::PkeKind::HybridX25519MlKem768,
            session: params.auth_session,
            option_flag: 0,
        };

        let params_client = params.clone();
        let domain_client = domain_secret.clone();
        let client_task = tokio::spawn(async move {
            sdk::establish_session(client, Role::Initiator, client_identity, &params_client, &domain_client).await
        });
        let params_server = params.clone();
        let server_task =
            tokio::spawn(async move { sdk::establish_session(server, Role::Responder, server_identity, &params_server, &domain_secret).await });

        let (client_result, server_result) = tokio::join!(client_task, server_task);
        let (_, client_primary) = client_result.expect("client task panicked").unwrap_or_else(|e| die(format!("initiator exchange failed: {e}")));
        let (_, server_primary) = server_result.expect("server task panicked").unwrap_or_else(|e| die(format!("responder exchange failed: {e}")));

        let message = b"hello over dtm-kex";
        let ct = client_primary.forward.seal(message).unwrap_or_else(|e| die(format!("seal: {e}")));
        let pt = server_primary.ret.open(&ct).unwrap_or_else(|e| die(format!("open: {e}")));
        assert_eq!(pt, message, "round-trip mismatch");

        println!("session established; exchanged {} bytes round-trip", message.len());
    });
    ExitCode::SUCCESS
}
