use jetree::{
    cluster, cluster_events, HyperparameterRegistry, InputSelector, JetConfig, Kinematics,
    ParticleRecord,
};
use rand::prelude::*;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

/// A toy event: two hard sprays plus soft, partly unobserved, noise.
fn toy_event(rng: &mut StdRng) -> Vec<ParticleRecord> {
    let mut particles = Vec::new();
    for (axis_y, axis_phi, hard_pt) in [(0.3, 0.5, 60.0), (-0.8, -2.4, 45.0)] {
        for i in 0..6 {
            let pt: f64 = hard_pt / f64::from(i + 1) + rng.gen_range(0.0..1.0);
            let y: f64 = axis_y + rng.gen_range(-0.15..0.15);
            let phi: f64 = axis_phi + rng.gen_range(-0.15..0.15);
            let k = Kinematics::from_collider(pt, y, phi, pt * y.cosh());
            particles.push(ParticleRecord::new(k, true, true));
        }
    }
    for _ in 0..10 {
        let pt: f64 = rng.gen_range(0.1..2.0);
        let y: f64 = rng.gen_range(-4.0..4.0);
        let phi: f64 = rng.gen_range(-3.1..3.1);
        let k = Kinematics::from_collider(pt, y, phi, pt * y.cosh());
        particles.push(ParticleRecord::new(k, rng.gen_bool(0.5), rng.gen_bool(0.7)));
    }
    particles
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut rng = StdRng::seed_from_u64(7);
    let selector = InputSelector::default();
    let particles = toy_event(&mut rng);
    let selected = selector.select(&particles)?;
    println!(
        "{} particles, {} jet inputs",
        particles.len(),
        selected.len()
    );

    let jets = cluster(JetConfig::sequential(0.4, -1.0), &selected.inputs)?;
    println!("anti-kt R=0.4: {} jets", jets.len());
    for jet in &jets {
        let root = jet.root();
        let sources: Vec<usize> = jet
            .leaf_ids()
            .iter()
            .map(|&i| selected.source_idx[i])
            .collect();
        println!(
            "  root {:>3}  pT {:>7.2}  y {:>6.2}  phi {:>6.2}  from particles {:?}",
            root.id, root.kinematics.pt, root.kinematics.rapidity, root.kinematics.phi, sources
        );
    }

    // Same configuration over a small batch, recorded under one name.
    let events: Vec<Vec<Kinematics>> = (0..4)
        .map(|_| selector.select(&toy_event(&mut rng)).map(|s| s.inputs))
        .collect::<Result<_, _>>()?;
    let mut registry = HyperparameterRegistry::new();
    let out = cluster_events("AntiKt04", &JetConfig::sequential(0.4, -1.0), &events, &mut registry)?;
    println!("batch: {:?}", out.summary);
    if let Some(first) = out.events.first().and_then(|e| e.jets.first()) {
        println!("{}", serde_json::to_string_pretty(&first.to_json())?);
    }
    println!("{}", registry.to_json()?);
    Ok(())
}
