use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seam_engine::{sort, Patch, PatchInfo, PatchOwner, Priority, SortDirection};

fn constrained_set(n: usize) -> Vec<Patch> {
    let mut info = PatchInfo::new();
    for i in 0..n {
        let mut p = Patch::transpiler(PatchOwner::new(format!("p{}", i)), |s| s)
            .with_priority(Priority(((i * 37) % 800) as i32));
        if i % 4 == 0 && i > 0 {
            p = p.with_after(PatchOwner::new(format!("p{}", i - 1)));
        }
        info.add(p);
    }
    info.transpilers().to_vec()
}

fn bench_sort(c: &mut Criterion) {
    for n in [8, 64] {
        let patches = constrained_set(n);
        c.bench_function(&format!("sort_{}_constrained", n), |b| {
            b.iter(|| sort(black_box(&patches), SortDirection::HigherFirst, false))
        });
    }
}

criterion_group!(benches, bench_sort);
criterion_main!(benches);
