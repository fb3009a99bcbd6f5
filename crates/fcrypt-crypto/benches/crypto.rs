use fcrypt_crypto::{derive_key, init_essiv, EssivHash, MasterKey, RustCryptoBackend};

#[divan::bench(args = [16, 32, 64])]
fn bench_derive_key(bencher: divan::Bencher, size: usize) {
    let master = MasterKey::from_slice(0, &vec![0x5Au8; size]).unwrap();
    let nonce = [0x11u8; 16];
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            derive_key(
                &RustCryptoBackend,
                divan::black_box(&nonce),
                divan::black_box(&master),
            )
            .unwrap()
        });
}

#[divan::bench]
fn bench_init_essiv(bencher: divan::Bencher) {
    let hash = EssivHash::new();
    let key = [0x22u8; 16];
    bencher.bench(|| init_essiv(&RustCryptoBackend, &hash, divan::black_box(&key)).unwrap());
}

#[divan::bench]
fn bench_essiv_iv(bencher: divan::Bencher) {
    let hash = EssivHash::new();
    let essiv = init_essiv(&RustCryptoBackend, &hash, &[0x22u8; 16]).unwrap();
    let mut lblk = 0u64;
    bencher.bench_local(|| {
        lblk = lblk.wrapping_add(1);
        essiv.iv_for(divan::black_box(lblk)).unwrap()
    });
}

fn main() {
    divan::main();
}
