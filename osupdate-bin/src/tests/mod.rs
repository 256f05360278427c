// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    self::keys::{
        create_file, le_bytes, KEY_A_N, KEY_B_N, PUBLIC_B_PEM, SECRET_1024_PEM, SECRET_A_PEM,
        SECRET_B_PEM, SECRET_E3_PEM,
    },
    crate::ExitCode,
    boot_core::header::HEADER_SIZE,
};


const PAYLOAD: &[u8] = b"Hello, world!";

fn path(file: &tempfile::NamedTempFile) -> &str {
    file.path().to_str().unwrap()
}

/// Signs `PAYLOAD` with key A and returns the image file.
fn signed_image() -> tempfile::NamedTempFile {
    let secret = create_file(SECRET_A_PEM);
    let input = create_file(PAYLOAD);
    let output = create_file(b"");
    let result = test(["sign", "--secret", path(&secret), "-i", path(&input), "-o", path(&output)]);
    assert_eq!(result.exit_code, ExitCode(0));
    output
}

/// A file without the magic is reported, not rejected.
#[test]
fn dump_no_header() {
    let file = create_file(b"Hello, world! This is not an update image.");
    let output = test(["dump", "-i", path(&file)]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("no header"));
    assert!(output.stderr.is_empty());
}

#[test]
fn sign_then_dump() {
    let image = signed_image();
    let data = std::fs::read(image.path()).unwrap();
    assert_eq!(data.len(), HEADER_SIZE + PAYLOAD.len() + 512);
    assert_eq!(&data[..4], b"OSUP");
    assert_eq!(&data[4..8], &13u32.to_le_bytes());
    assert_eq!(&data[8..12], &[0xFF; 4]);
    assert_eq!(&data[HEADER_SIZE..HEADER_SIZE + PAYLOAD.len()], PAYLOAD);
    assert_eq!(&data[data.len() - 256..], le_bytes(KEY_A_N).as_slice());

    let output = test(["dump", "-i", path(&image)]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("OSUP"));
    // Prints the payload size.
    assert!(output.stdout.contains("13 B (13)"));
    assert!(output.stdout.contains("in-progress (0xff)"));
    // Prints the signature in hex.
    let sig = &data[HEADER_SIZE + PAYLOAD.len()..][..256];
    assert!(output.stdout.contains(&hex::encode(&sig[..32])));
    assert!(output.stdout.contains(&hex::encode(&sig[224..])));
    assert!(output.stdout.contains("valid (embedded key only)"));
    assert!(output.stderr.is_empty());
}

#[test]
fn dump_against_known_keys() {
    let image = signed_image();
    let key_a = create_file(&le_bytes(KEY_A_N));
    let key_b = create_file(&le_bytes(KEY_B_N));

    let keys = format!("{},{}", path(&key_b), path(&key_a));
    let output = test(["dump", "-i", path(&image), "--known-key", &keys]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("valid (known keys)"));

    let output = test(["dump", "-i", path(&image), "--known-key", path(&key_b)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("unknown public key (code 3)"));
}

#[test]
fn dump_corrupted_image() {
    let image = signed_image();
    let mut data = std::fs::read(image.path()).unwrap();
    data[HEADER_SIZE + 3] ^= 1;
    let file = create_file(&data);
    let output = test(["dump", "-i", path(&file)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("invalid signature hash (code 5)"));

    let truncated = create_file(&data[..data.len() - 1]);
    let output = test(["dump", "-i", path(&truncated)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("image truncated"));
}

/// The marker is not signed, so a downloaded or verified image still checks.
#[test]
fn dump_ignores_marker() {
    let image = signed_image();
    let mut data = std::fs::read(image.path()).unwrap();
    data[8] = 0xF0;
    let file = create_file(&data);
    let output = test(["dump", "-i", path(&file)]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("verified (0xf0)"));
    assert!(output.stdout.contains("valid (embedded key only)"));
}

#[test]
fn pack_writes_an_unsigned_header() {
    let input = create_file(PAYLOAD);
    let output = create_file(b"");
    let result = test(["pack", "-i", path(&input), "-o", path(&output)]);
    assert_eq!(result.exit_code, ExitCode(0));

    let data = std::fs::read(output.path()).unwrap();
    assert_eq!(data.len(), HEADER_SIZE + PAYLOAD.len());
    assert_eq!(&data[..8], b"OSUP\x0d\x00\x00\x00");
    assert_eq!(&data[8..12], &[0xFF; 4]);
    assert_eq!(&data[HEADER_SIZE..], PAYLOAD);
}

#[test]
fn sign_in_place() {
    let secret = create_file(SECRET_A_PEM);
    let file = create_file(PAYLOAD);
    let output = test(["sign", "--secret", path(&secret), "-i", path(&file), "--in-place"]);
    assert_eq!(output.exit_code, ExitCode(0));

    let data = std::fs::read(file.path()).unwrap();
    assert_eq!(&data[..4], b"OSUP");
    assert_eq!(data.len(), HEADER_SIZE + PAYLOAD.len() + 512);

    // Signing the result again would wrap an image in an image.
    let output = test(["sign", "--secret", path(&secret), "-i", path(&file), "--in-place"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("already an update image"));
}

#[test]
fn sign_checks_known_keys() {
    let secret = create_file(SECRET_B_PEM);
    let input = create_file(PAYLOAD);
    let output = create_file(b"");
    let key_a = create_file(&le_bytes(KEY_A_N));
    let result = test([
        "sign",
        "--secret",
        path(&secret),
        "-i",
        path(&input),
        "-o",
        path(&output),
        "--known-key",
        path(&key_a),
    ]);
    assert_eq!(result.exit_code, ExitCode(1));
    assert!(result.stderr.contains("not in known keys"));
    assert!(std::fs::read(output.path()).unwrap().is_empty());
}

#[test]
fn sign_output_arguments() {
    let secret = create_file(SECRET_A_PEM);
    let input = create_file(PAYLOAD);

    let output = test(["sign", "--secret", path(&secret), "-i", path(&input)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("either --in-place or --output"));

    let output = test([
        "sign",
        "--secret",
        path(&secret),
        "-i",
        path(&input),
        "--in-place",
        "-o",
        "out.bin",
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("cannot specify both"));
}

#[test]
fn sign_without_secret() {
    let input = create_file(PAYLOAD);
    let output = test(["sign", "-i", path(&input), "--in-place"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("did not specify a secret key"));
}

#[test]
fn rejects_unusable_secret_keys() {
    let input = create_file(PAYLOAD);
    let sign = |secret: &tempfile::NamedTempFile| {
        test(["sign", "--secret", path(secret), "-i", path(&input), "--in-place"])
    };

    // Raw key material is not accepted, only PEM.
    let raw = create_file(&[le_bytes(KEY_A_N), le_bytes(KEY_B_N)].concat());
    let output = sign(&raw);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("invalid secret key: pem parse error"));

    let public = create_file(PUBLIC_B_PEM);
    let output = sign(&public);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains(r#"unsupported pem label "PUBLIC KEY""#));

    let short = create_file(SECRET_1024_PEM);
    let output = sign(&short);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("1024-bit key, expected 2048"));

    let e3 = create_file(SECRET_E3_PEM);
    let output = sign(&e3);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("public exponent 3, expected 65537"));

    // Payload untouched.
    assert_eq!(std::fs::read(input.path()).unwrap(), PAYLOAD);
}

#[test]
fn pkcs1_and_pkcs8_keys_both_sign() {
    for (secret, modulus) in [(SECRET_A_PEM, KEY_A_N), (SECRET_B_PEM, KEY_B_N)] {
        let secret = create_file(secret);
        let file = create_file(PAYLOAD);
        let output = test(["sign", "--secret", path(&secret), "-i", path(&file), "--in-place"]);
        assert_eq!(output.exit_code, ExitCode(0));

        let data = std::fs::read(file.path()).unwrap();
        assert_eq!(&data[data.len() - 256..], le_bytes(modulus).as_slice());
        let output = test(["dump", "-i", path(&file)]);
        assert!(output.stdout.contains("valid (embedded key only)"));
    }
}

#[test]
fn known_keys_may_be_pem() {
    let secret = create_file(SECRET_B_PEM);
    let file = create_file(PAYLOAD);
    let public = create_file(PUBLIC_B_PEM);
    let output = test([
        "sign",
        "--secret",
        path(&secret),
        "-i",
        path(&file),
        "--in-place",
        "--known-key",
        path(&public),
    ]);
    assert_eq!(output.exit_code, ExitCode(0));

    let output = test(["dump", "-i", path(&file), "--known-key", path(&public)]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("valid (known keys)"));

    let wrong_length = create_file(&le_bytes(KEY_B_N)[..255]);
    let output = test(["dump", "-i", path(&file), "--known-key", path(&wrong_length)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("255 bytes, expected 256"));
}

#[test]
fn pubkey_writes_the_modulus() {
    let secret = create_file(SECRET_B_PEM);
    let output = create_file(b"");
    let result = test(["pubkey", "--secret", path(&secret), "-o", path(&output)]);
    assert_eq!(result.exit_code, ExitCode(0));
    assert_eq!(std::fs::read(output.path()).unwrap(), le_bytes(KEY_B_N));
}

#[test]
fn config_paths_are_relative_to_the_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("release.key"), SECRET_A_PEM).unwrap();
    std::fs::write(dir.path().join("release.pub"), le_bytes(KEY_A_N)).unwrap();
    std::fs::write(
        dir.path().join("osupdate.toml"),
        "secret = \"release.key\"\nknown_keys = [\"release.pub\"]\n",
    )
    .unwrap();
    let config = dir.path().join("osupdate.toml");
    let config = config.to_str().unwrap();

    let input = create_file(PAYLOAD);
    let output = test(["sign", "-c", config, "-i", path(&input), "--in-place"]);
    assert_eq!(output.exit_code, ExitCode(0));

    let output = test(["dump", "-c", config, "-i", path(&input)]);
    assert_eq!(output.exit_code, ExitCode(0));
    assert!(output.stdout.contains("valid (known keys)"));
}

#[test]
fn config_and_cli_conflict() {
    let secret = create_file(SECRET_A_PEM);
    let config = create_file(format!("secret = {:?}\n", path(&secret)).as_bytes());
    let input = create_file(PAYLOAD);
    let output = test([
        "sign",
        "-c",
        path(&config),
        "--secret",
        path(&secret),
        "-i",
        path(&input),
        "--in-place",
    ]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("secret specified in both config and cli"));

    let key = create_file(&le_bytes(KEY_A_N));
    let config = create_file(format!("known_keys = [{:?}]\n", path(&key)).as_bytes());
    let output = test(["dump", "-c", path(&config), "-i", path(&input), "--known-key", path(&key)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("known keys specified in both config and cli"));
}

#[test]
fn config_rejects_unknown_fields() {
    let config = create_file(b"secrets = \"typo.key\"\n");
    let input = create_file(PAYLOAD);
    let output = test(["dump", "-c", path(&config), "-i", path(&input)]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stderr.contains("config file format error"));
}

#[test]
fn cli_errors_are_printed_by_clap() {
    let output = test(["frobnicate"]);
    assert_eq!(output.exit_code, ExitCode(1));
    assert!(output.stdout.is_empty());
    assert!(!output.stderr.is_empty());
}

fn test<const N: usize>(args: [&str; N]) -> Output {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let exit_code = crate::main_args(
        std::iter::once("osupdate").chain(args),
        &mut stdout,
        &mut stderr,
    );
    println!("* args: {:?}", args);
    println!("* exit_code: {:?}", exit_code);
    println!("* stdout:\n{}", String::from_utf8_lossy(&stdout));
    println!("* stderr:\n{}", String::from_utf8_lossy(&stderr));
    Output {
        exit_code,
        stdout: String::from_utf8(stdout).unwrap(),
        stderr: String::from_utf8(stderr).unwrap(),
    }
}

#[derive(Debug)]
struct Output {
    exit_code: ExitCode,
    stdout: String,
    stderr: String,
}
