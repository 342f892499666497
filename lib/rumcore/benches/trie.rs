#[macro_use]
extern crate criterion;
extern crate rand;
extern crate rumcore;

use criterion::black_box;
use criterion::Criterion;
use rand::prelude::*;
use rumcore::Trie;
use std::net::Ipv4Addr;

fn random_v4(rng: &mut impl Rng) -> Ipv4Addr {
    Ipv4Addr::from(rng.gen::<u32>())
}

fn populated_trie(rng: &mut impl Rng, routes: usize) -> Trie<u32> {
    let mut trie = Trie::new();
    for i in 0..routes {
        let prefix_bits = 8 + (i % 24) as u8;
        trie.insert(random_v4(rng), prefix_bits, i as u32).unwrap();
    }
    trie
}

fn find_bench(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let trie = populated_trie(&mut rng, 10_000);
    let probe = random_v4(&mut rng);

    c.bench_function("Trie find (10k routes)", move |b| {
        b.iter(|| black_box(trie.find(black_box(probe))));
    });
}

fn insert_bench(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let addresses: Vec<Ipv4Addr> = (0..1_000).map(|_| random_v4(&mut rng)).collect();

    c.bench_function("Trie insert (1k routes)", move |b| {
        b.iter(|| {
            let mut trie = Trie::new();
            for (i, addr) in addresses.iter().enumerate() {
                trie.insert(*addr, 8 + (i % 24) as u8, i as u32).unwrap();
            }
            black_box(&trie);
        });
    });
}

criterion_group!(benches, find_bench, insert_bench);
criterion_main!(benches);
