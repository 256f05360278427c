// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

mod api;

use consts::{FLASH_KEY1, FLASH_KEY2};
use num_bigint::BigUint;

use crate::flash::{FlashKeys, FlashRegion, KeyedFlash, Programmer, RegionTable, RegionType};
use crate::header::{Marker, MARKER_OFFSET};
use crate::image::{image_len, seal, RsaSign};
use crate::ram::RamFlash;
use crate::rsa::{PubKey, RSA_BYTES};
use crate::update::mark_update;

// Test flash layout, 1 KiB pages:
// 0x0000 bootloader, 0x0400 kernel, 0x1400 shared, 0x3400 data store,
// 0x3C00 unassigned.
pub const FLASH_LEN: usize = 0x4000;
pub const BOOTLOADER_BASE: u32 = 0x0000;
pub const KERNEL_BASE: u32 = 0x0400;
pub const KERNEL_LEN: u32 = 0x1000;
pub const SHARED_BASE: u32 = 0x1400;
pub const SHARED_LEN: u32 = 0x2000;
pub const DATA_BASE: u32 = 0x3400;
pub const DATA_LEN: u32 = 0x0800;

pub static REGIONS: [FlashRegion; 4] = [
    FlashRegion::new(BOOTLOADER_BASE, 0x0400, RegionType::Bootloader),
    FlashRegion::new(KERNEL_BASE, KERNEL_LEN, RegionType::Kernel),
    FlashRegion::new(SHARED_BASE, SHARED_LEN, RegionType::Shared),
    FlashRegion::new(DATA_BASE, DATA_LEN, RegionType::DataStore),
];

pub const UNLOCK: FlashKeys = FlashKeys::new(FLASH_KEY1, FLASH_KEY2);

pub type TestFlash = KeyedFlash<RamFlash<FLASH_LEN>>;

pub fn programmer() -> Programmer<'static, TestFlash> {
    let table = RegionTable::new(&REGIONS).unwrap();
    Programmer::new(KeyedFlash::new(RamFlash::new()), table)
}

pub fn ram<'p>(prog: &'p Programmer<'_, TestFlash>) -> &'p [u8] {
    prog.flash().inner().as_bytes()
}

// Throwaway 2048-bit test keys, big-endian hex.
const KEY_A_N: &str = concat!(
    "b3a2ed35ea260b34f5374c851f8c769f3516ce4c5f6c3d971fc850a2262e782a",
    "1c4016e6eee41a91f7e0efb1c51ca14b73aec1d01195f9be4f65378567012792",
    "c97439f3d5feafcf13777c7abc915dccb661ea27ca5ea5ee0fb0d28503d4401b",
    "f88cc1498018502e390d09e739e932799c22147bda872de3e54ccbd0a5e5d5bd",
    "4b40c26002fafff0ca48ffcbec4550a3c357be75d27983551949b7c9d78acbd9",
    "3f4f25e8d460e9716cb2e85336910bbd19fe40563ea2208704c0b65e8f2b8bda",
    "1d34e358ccc0e9aa483cf9bfe504363cf105daa8bda204143066f00511fcc4d0",
    "05ae324887f4413b5877219ecb10a92f25d8ee6b107d9b076c23323b27588b03",
);
const KEY_A_D: &str = concat!(
    "02116d9eb1c7e758203c973e6f1b0c608fd967dd9c39a049e59d46445fa12853",
    "ffc8431b3c83d6c478709801d96d9773c96ca9218e9a45ea497ab6556c56a890",
    "798e437e89a7a9797e556152fe69c4052fd257c24683a97060b0ddf3971431fa",
    "c0754a6260bda6eaa9507b9d345ef96c49fe6072fe9490d42f571f7f92f15ef1",
    "0e84903388ee4ec0b342f0dff3e763ae65241c520d533e7a764f5e459eb3690d",
    "92040d145642b3337c146536c10b5495c15ef944d28a4c309c9faa9c9248a8ce",
    "60b9bfb92462a90c8dac05275527ebcc6b9416c7f123ee6b20243e0ae223c889",
    "2047075780bd7cb690680a840bf1e7cba975c5e84beccca228c6c274a9bed2ed",
);

const KEY_B_N: &str = concat!(
    "c93a7ffcd3a63d807c05e7090fbca47216e2846edaece68a40f6c66af000b6e4",
    "47fd11c6c15e2f15b8daa40c3d3f0d881f7a70d2dcd162ba4fd01536786626d3",
    "879ee4d5cb85cbec9ea67da87ba234d2222dfc364928e62b2854ebad80d572bc",
    "45bc63cc337595d3308083d58a4739c08a226f253c545919d617fa1df69dec5b",
    "a99c8c6d21c2b02083c5fed569446e71b9998428cfd2c2e9ef86580a191b839d",
    "2ca5cf81314be578f9b22367bc2c2162436a47b7cb4776524e3f5d70457e5710",
    "9e9b7cf36a1881fca1004fef424b8349ac99e4900585a035874a5a30a0aa7557",
    "db591123ec3bd8f828da28cf2fb85aeee4d7670df3f62f5ff6c246a50384c3bf",
);
const KEY_B_D: &str = concat!(
    "17c797ff08013f320320acc56a07558f9346157706dc09551134430d0ec0fc31",
    "4c93356f3d6ea48b2145da83afc12c6cdcfb6fd5c5f935d23a98511ec214f59a",
    "f8633de6489f79126f4a7c28558e924610254b06c7427eb609956f7c6e1b2097",
    "40791b7a0822bf1fd93d76ac3223bf496789862f94f4e01ffe283b35cb4257a9",
    "e50e54badcef97c5d0d41fe5c24cce2f9b60b918449d69299478c3d0bf28ae1f",
    "00de38a258085ed2f8157db318f3581153fce912e180bdb213993e3e671b00b7",
    "b9310b371aa9c651eed689456fc32249238ac00f1a8344828ac98e49f19766b6",
    "a402522b7da26335756d264ece842bae63026e1af346e09564287aa5d17d7191",
);

pub struct TestSigner {
    n: BigUint,
    d: BigUint,
}

impl TestSigner {
    fn from_hex(n: &str, d: &str) -> Self {
        Self {
            n: BigUint::parse_bytes(n.as_bytes(), 16).unwrap(),
            d: BigUint::parse_bytes(d.as_bytes(), 16).unwrap(),
        }
    }
}

impl RsaSign for TestSigner {
    fn modulus(&self) -> PubKey {
        to_le(&self.n)
    }

    fn sign_block(&self, block: &[u8; RSA_BYTES]) -> [u8; RSA_BYTES] {
        to_le(&BigUint::from_bytes_le(block).modpow(&self.d, &self.n))
    }
}

pub fn to_le(x: &BigUint) -> [u8; RSA_BYTES] {
    let bytes = x.to_bytes_le();
    let mut out = [0u8; RSA_BYTES];
    out[..bytes.len()].copy_from_slice(&bytes);
    out
}

pub fn signer() -> TestSigner {
    TestSigner::from_hex(KEY_A_N, KEY_A_D)
}

pub fn other_signer() -> TestSigner {
    TestSigner::from_hex(KEY_B_N, KEY_B_D)
}

/// Key table holding only the first test key.
pub fn known_keys() -> [PubKey; 1] {
    [signer().modulus()]
}

/// Deterministic filler for signature padding. Yields zeros now and then,
/// which the encoder has to skip.
pub fn filler() -> impl FnMut() -> u8 {
    let mut x = 0u8;
    move || {
        x = x.wrapping_add(37);
        x
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

pub fn sealed(payload: &[u8], signer: &TestSigner) -> Vec<u8> {
    let mut out = vec![0u8; image_len(payload.len())];
    let len = seal(payload, &mut out, signer, filler()).unwrap();
    assert_eq!(len, out.len());
    out
}

/// Writes `image` at the start of the shared area as the protocol would.
pub fn stage(prog: &mut Programmer<'_, TestFlash>, image: &[u8]) {
    prog.program_typed(SHARED_BASE, image, RegionType::Shared, &UNLOCK)
        .unwrap();
}

/// Stages `image` and moves it to DOWNLOADED, ready for verification.
pub fn stage_downloaded(prog: &mut Programmer<'_, TestFlash>, image: &[u8]) {
    stage(prog, image);
    mark_update(prog, SHARED_BASE, Marker::InProgress, Marker::Downloaded, &UNLOCK).unwrap();
}

pub fn marker(prog: &Programmer<'_, TestFlash>) -> u8 {
    ram(prog)[(SHARED_BASE + MARKER_OFFSET) as usize]
}
