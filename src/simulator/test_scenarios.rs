use super::*;
use crate::config::SimulationBuilder;
use crate::demography::{PopulationConfiguration, Sample};
use crate::pedigree::Pedigree;
use crate::rate_map::RateMap;
use crate::test_utils::*;
use crate::SimulationOptions;

fn count_flagged(tables: &GenealogyTables, f: impl Fn(&NodeFlags) -> bool) -> usize {
    tables.nodes.flags.iter().filter(|x| f(x)).count()
}

fn oldest_node_time(tables: &GenealogyTables) -> f64 {
    tables.nodes.time.iter().copied().fold(0.0, f64::max)
}

#[test]
fn test_no_recombination_gives_one_tree() {
    let config = SimulationBuilder::new()
        .num_samples(10)
        .recombination_map(RateMap::uniform(100.0, 0.0, false).unwrap())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 101);
    assert_eq!(sim.counts().common_ancestor, 9);
    assert_eq!(sim.counts().recombination, 0);
    assert_eq!(tables.num_nodes(), 19);
    assert_eq!(tables.num_edges(), 18);
    assert!(sim.breakpoints().is_empty());
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    assert_eq!(tables.marginal_roots().len(), 1);
    to_tree_sequence(&tables);
}

#[test]
fn test_recombination() {
    let config = SimulationBuilder::new()
        .num_samples(8)
        .reference_size(100.0)
        .recombination_map(RateMap::uniform(1e4, 1e-5, false).unwrap())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 2);
    assert!(sim.counts().recombination > 0);
    let breakpoints = sim.breakpoints();
    assert!(breakpoints.windows(2).all(|w| w[0] < w[1]));
    assert!(breakpoints.len() as u64 <= sim.counts().recombination);
    assert!(breakpoints.iter().all(|&b| b > 0.0 && b < 1e4));
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    assert!(tables.marginal_roots().len() > 1);
    to_tree_sequence(&tables);
}

#[test]
fn test_discrete_genome() {
    let config = SimulationBuilder::new()
        .num_samples(6)
        .reference_size(100.0)
        .recombination_map(RateMap::uniform(50.0, 1e-3, true).unwrap())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 3);
    assert!(sim.breakpoints().iter().all(|&b| b == b.floor()));
    for e in tables.edges.iter() {
        assert_eq!(e.left, e.left.floor());
        assert_eq!(e.right, e.right.floor());
    }
    assert_fully_coalesced(&tables);
}

#[test]
fn test_same_seed_same_tables() {
    let config = SimulationBuilder::new()
        .num_samples(6)
        .reference_size(50.0)
        .recombination_map(RateMap::uniform(1e3, 1e-4, false).unwrap())
        .build()
        .unwrap();
    let (_, a) = run_to_completion(config.clone(), 77);
    let (mut sim, b) = run_to_completion(config, 77);
    assert_eq!(a, b);

    sim.reset();
    assert_eq!(sim.state(), SimulationState::Idle);
    assert_eq!(sim.num_lineages(), 6);
    sim.run(f64::INFINITY).unwrap();
    let c = sim.finalize().unwrap();
    assert_ne!(a, c);

    sim.reset_with_seed(77);
    assert_eq!(sim.counts(), &EventCounts::new(1));
    sim.run(f64::INFINITY).unwrap();
    assert_eq!(sim.finalize().unwrap(), a);
}

// Stop at time 10, look, then carry on.
#[test]
fn test_end_time_and_resume() {
    let config = SimulationBuilder::new()
        .num_samples(10)
        .reference_size(1e4)
        .recombination_map(RateMap::uniform(1e3, 1e-6, false).unwrap())
        .build()
        .unwrap();
    let mut sim = Simulator::new(config, 5);
    assert_eq!(sim.run(10.0).unwrap(), SimulationState::Paused);
    assert_eq!(sim.time(), 10.0);
    let paused = sim.finalize().unwrap();
    assert_eq!(paused, sim.finalize().unwrap());
    let unfinished = (0..paused.num_nodes())
        .map(NodeId)
        .filter(|&n| paused.node_flags(n).is_unfinished())
        .collect::<Vec<_>>();
    assert_eq!(unfinished.len(), sim.num_lineages());
    assert!(unfinished.iter().all(|&n| paused.node_time(n) == 10.0));
    assert_edges_consistent(&paused);
    to_tree_sequence(&paused);

    // finalizing did not touch the engine
    assert_eq!(sim.tables().num_nodes() + unfinished.len(), paused.num_nodes());
    assert_eq!(sim.run(f64::INFINITY).unwrap(), SimulationState::Completed);
    let tables = sim.finalize().unwrap();
    assert_eq!(count_flagged(&tables, NodeFlags::is_unfinished), 0);
    assert_fully_coalesced(&tables);
}

#[test]
fn test_bad_states() {
    let config = SimulationBuilder::new().num_samples(2).build().unwrap();
    let mut sim = Simulator::new(config, 1);
    assert!(matches!(
        sim.finalize(),
        Err(SimulationError::BadState(SimulationState::Idle))
    ));
    assert!(matches!(
        sim.run(f64::NAN),
        Err(SimulationError::Validation(_))
    ));
    sim.run(f64::INFINITY).unwrap();
    assert!(matches!(
        sim.run(f64::INFINITY),
        Err(SimulationError::BadState(SimulationState::Completed))
    ));
    assert!(sim.finalize().is_ok());
}

// Two isolated populations with no way to meet.
#[test]
fn test_isolated_populations_cannot_finish() {
    let config = SimulationBuilder::new()
        .population_configurations(vec![
            PopulationConfiguration::new(Some(1.0), 0.0, 2),
            PopulationConfiguration::new(Some(1.0), 0.0, 2),
        ])
        .build()
        .unwrap();
    let mut sim = Simulator::new(config, 1);
    assert!(matches!(
        sim.run(f64::INFINITY),
        Err(SimulationError::InternalInvariant(_))
    ));
    assert_eq!(sim.state(), SimulationState::Running);
    assert!(matches!(
        sim.run(f64::INFINITY),
        Err(SimulationError::BadState(SimulationState::Running))
    ));
}

//      root (t >= 100, pop 0)
//      /    \
//    MRCA0  MRCA1
//    /||\   /||\
//   pop 0   pop 1
#[test]
fn test_mass_migration_joins_populations() {
    let config = SimulationBuilder::new()
        .population_configurations(vec![
            PopulationConfiguration::new(Some(0.25), 0.0, 5),
            PopulationConfiguration::new(Some(0.25), 0.0, 5),
        ])
        .demographic_events(vec![DemographicEvent::MassMigration {
            time: 100.0,
            source: 1,
            dest: 0,
            proportion: 1.0,
        }])
        .options(SimulationOptions::default().with_migrations())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 11);
    assert_eq!(tables.nodes.time.iter().filter(|&&t| t >= 100.0).count(), 1);
    let root = NodeId(tables.num_nodes() - 1);
    assert!(tables.node_time(root) >= 100.0);
    assert_eq!(tables.node_population(root), 0);
    // a mass migration is not a migration event
    assert_eq!(sim.counts().total_migration(), 0);
    assert_eq!(tables.migrations.len(), 1);
    let m = tables.migrations.get(0);
    assert_eq!((m.source, m.dest, m.time), (1, 0, 100.0));
    assert_fully_coalesced(&tables);
}

// Lineages can move from 0 to 1 but never back.
#[test]
fn test_migration_direction() {
    let config = SimulationBuilder::new()
        .population_configurations(vec![
            PopulationConfiguration::new(Some(1e6), 0.0, 2),
            PopulationConfiguration::new(Some(1.0), 0.0, 0),
        ])
        .migration_matrix(vec![vec![0.0, 1.0], vec![0.0, 0.0]])
        .options(SimulationOptions::default().with_migrations())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 8);
    assert_eq!(sim.counts().migration[0][1], 2);
    assert_eq!(sim.counts().migration[1][0], 0);
    assert_eq!(tables.migrations.len(), 2);
    assert!(tables.migrations.source.iter().all(|&s| s == 0));
    assert!(tables.migrations.dest.iter().all(|&d| d == 1));
    assert_eq!(tables.node_population(NodeId(2)), 1);
}

fn bottleneck_config(event: DemographicEvent) -> SimulationConfig {
    SimulationBuilder::new()
        .num_samples(5)
        .reference_size(1e6)
        .recombination_map(RateMap::uniform(10.0, 0.0, false).unwrap())
        .demographic_events(vec![event])
        .build()
        .unwrap()
}

//        6
//   / / | \ \
//  0 1  2  3 4
#[test]
fn test_simple_bottleneck_merges_everyone() {
    let config = bottleneck_config(DemographicEvent::SimpleBottleneck {
        time: 0.5,
        population: 0,
        proportion: 1.0,
    });
    let (sim, tables) = run_to_completion(config, 1);
    assert_eq!(sim.counts().common_ancestor, 1);
    assert_eq!(tables.num_nodes(), 6);
    assert_eq!(tables.node_time(NodeId(5)), 0.5);
    assert_eq!(tables.num_edges(), 5);
    assert_fully_coalesced(&tables);
}

#[test]
fn test_strong_instantaneous_bottleneck() {
    let config = bottleneck_config(DemographicEvent::InstantaneousBottleneck {
        time: 0.5,
        population: 0,
        strength: 1e6,
    });
    let (sim, tables) = run_to_completion(config, 1);
    assert_eq!(sim.counts().common_ancestor, 1);
    assert_eq!(tables.num_nodes(), 6);
    assert_eq!(tables.node_time(NodeId(5)), 0.5);
}

#[test]
fn test_census() {
    let config = SimulationBuilder::new()
        .num_samples(4)
        .reference_size(1e6)
        .recombination_map(RateMap::uniform(10.0, 0.0, false).unwrap())
        .demographic_events(vec![DemographicEvent::CensusEvent { time: 1.0 }])
        .build()
        .unwrap();
    let (_, tables) = run_to_completion(config, 4);
    let census = (0..tables.num_nodes())
        .map(NodeId)
        .filter(|&n| tables.node_flags(n).is_census())
        .collect::<Vec<_>>();
    assert_eq!(census.len(), 4);
    assert!(census.iter().all(|&n| tables.node_time(n) == 1.0));
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    to_tree_sequence(&tables);
}

#[test]
fn test_historical_samples() {
    let mut samples = vec![Sample::new(0, 0.0); 3];
    samples.extend([Sample::new(0, 5.0); 2]);
    let config = SimulationBuilder::new()
        .samples(samples)
        .recombination_map(RateMap::uniform(100.0, 1e-3, false).unwrap())
        .build()
        .unwrap();
    let mut sim = Simulator::new(config, 12);
    assert_eq!(sim.num_lineages(), 3);
    assert_eq!(sim.run(f64::INFINITY).unwrap(), SimulationState::Completed);
    let tables = sim.finalize().unwrap();
    assert_eq!(tables.node_time(NodeId(3)), 5.0);
    assert_eq!(tables.node_time(NodeId(4)), 5.0);
    assert!(oldest_node_time(&tables) > 5.0);
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
}

#[test]
fn test_population_size_change() {
    let config = SimulationBuilder::new()
        .num_samples(10)
        .reference_size(1e6)
        .demographic_events(vec![DemographicEvent::PopulationParametersChange {
            time: 10.0,
            initial_size: Some(1.0),
            growth_rate: Some(0.0),
            population: None,
        }])
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 21);
    assert_eq!(sim.populations().population(0).initial_size, 1.0);
    assert_eq!(sim.populations().population(0).start_time, 10.0);
    // In a population of a million, nothing happens
    // in the first ten generations.
    assert!(tables
        .nodes
        .time
        .iter()
        .all(|&t| t == 0.0 || t > 10.0));
}

#[test]
fn test_exponential_growth() {
    let config = SimulationBuilder::new()
        .population_configurations(vec![PopulationConfiguration::new(Some(1e3), 0.05, 8)])
        .recombination_map(RateMap::uniform(100.0, 1e-4, false).unwrap())
        .build()
        .unwrap();
    let (_, tables) = run_to_completion(config, 31);
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
}

#[test]
fn test_smc_models() {
    for model in [SimulationModel::Smc, SimulationModel::SmcPrime] {
        let config = SimulationBuilder::new()
            .num_samples(6)
            .reference_size(100.0)
            .model(model)
            .recombination_map(RateMap::uniform(1e3, 1e-4, false).unwrap())
            .build()
            .unwrap();
        let (sim, tables) = run_to_completion(config, 41);
        assert!(sim.counts().common_ancestor > 0);
        assert_fully_coalesced(&tables);
        assert_edges_consistent(&tables);
    }
}

#[test]
fn test_multiple_merger_models() {
    let models = [
        SimulationModel::Beta {
            alpha: 1.5,
            truncation_point: 1.0,
        },
        SimulationModel::Dirac { psi: 0.5, c: 10.0 },
    ];
    for model in models {
        let config = SimulationBuilder::new()
            .num_samples(20)
            .reference_size(100.0)
            .model(model)
            .recombination_map(RateMap::uniform(100.0, 0.0, false).unwrap())
            .build()
            .unwrap();
        let (sim, tables) = run_to_completion(config, 51);
        assert_eq!(
            tables.num_nodes() as u64,
            20 + sim.counts().common_ancestor
        );
        assert_fully_coalesced(&tables);
        assert_edges_consistent(&tables);
        to_tree_sequence(&tables);
    }
}

#[test]
fn test_dtwf() {
    let config = SimulationBuilder::new()
        .num_samples(6)
        .reference_size(20.0)
        .model(SimulationModel::Dtwf)
        .recombination_map(RateMap::uniform(100.0, 1e-3, false).unwrap())
        .build()
        .unwrap();
    let (_, tables) = run_to_completion(config, 61);
    assert!(tables.nodes.time.iter().all(|&t| t == t.floor()));
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    to_tree_sequence(&tables);
}

#[test]
fn test_dtwf_then_hudson() {
    let config = SimulationBuilder::new()
        .num_samples(10)
        .reference_size(1e3)
        .model(SimulationModel::Dtwf)
        .demographic_events(vec![DemographicEvent::ModelChange {
            time: 20.0,
            model: SimulationModel::Hudson,
        }])
        .recombination_map(RateMap::uniform(100.0, 1e-4, false).unwrap())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 62);
    assert_eq!(sim.model(), SimulationModel::Hudson);
    assert!(oldest_node_time(&tables) > 20.0);
    assert_fully_coalesced(&tables);
}

#[test]
fn test_dtwf_migration() {
    let config = SimulationBuilder::new()
        .population_configurations(vec![
            PopulationConfiguration::new(Some(10.0), 0.0, 3),
            PopulationConfiguration::new(Some(10.0), 0.0, 3),
        ])
        .migration_matrix(vec![vec![0.0, 0.1], vec![0.1, 0.0]])
        .model(SimulationModel::Dtwf)
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 63);
    assert!(sim.counts().total_migration() > 0);
    assert_fully_coalesced(&tables);
}

// Census nodes sit at the census time, between
// generations or after the one at the same time,
// and the next generation is older still.
#[test]
fn test_dtwf_census() {
    for census_time in [3.0, 3.5] {
        let mut num_census = 0;
        for seed in 0..30 {
            let config = SimulationBuilder::new()
                .population_configurations(vec![
                    PopulationConfiguration::new(Some(10.0), 0.0, 3),
                    PopulationConfiguration::new(Some(10.0), 0.0, 3),
                ])
                .migration_matrix(vec![vec![0.0, 0.1], vec![0.1, 0.0]])
                .model(SimulationModel::Dtwf)
                .recombination_map(RateMap::uniform(100.0, 1e-3, false).unwrap())
                .demographic_events(vec![DemographicEvent::CensusEvent { time: census_time }])
                .build()
                .unwrap();
            let (_, tables) = run_to_completion(config, seed);
            for i in 0..tables.num_nodes() {
                let node = NodeId(i);
                if tables.node_flags(node).is_census() {
                    num_census += 1;
                    assert_eq!(tables.node_time(node), census_time);
                } else {
                    let t = tables.node_time(node);
                    assert_eq!(t, t.floor());
                }
            }
            assert_fully_coalesced(&tables);
            assert_edges_consistent(&tables);
        }
        assert!(num_census > 0);
    }
}

#[test]
fn test_sweep_then_hudson() {
    let model = SimulationModel::Sweep {
        position: 5e3,
        start_frequency: 5e-4,
        end_frequency: 0.9995,
        alpha: 1000.0,
        dt: 1e-3,
    };
    let config = SimulationBuilder::new()
        .num_samples(10)
        .reference_size(1000.0)
        .model(model)
        .recombination_map(RateMap::uniform(1e4, 1e-7, false).unwrap())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 71);
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    if sim.model() != model {
        assert_eq!(sim.model(), SimulationModel::Hudson);
    }
}

#[test]
fn test_pedigree_then_hudson() {
    // Two siblings with founder parents.
    let pedigree = Pedigree::from_ids(&[1, 2, 3, 4], &[[3, 4], [3, 4], [0, 0], [0, 0]], None).unwrap();
    let config = SimulationBuilder::new()
        .model(SimulationModel::WfPedigree)
        .pedigree(pedigree)
        .reference_size(10.0)
        .recombination_map(RateMap::uniform(100.0, 1e-3, false).unwrap())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 81);
    assert_eq!(sim.model(), SimulationModel::Hudson);
    assert_eq!(count_flagged(&tables, NodeFlags::is_sample), 4);
    assert!(oldest_node_time(&tables) >= 1.0);
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
}

#[test]
fn test_gene_conversion() {
    let config = SimulationBuilder::new()
        .num_samples(6)
        .reference_size(100.0)
        .recombination_map(RateMap::uniform(1e3, 0.0, false).unwrap())
        .gene_conversion(1e-4, 50.0)
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 91);
    let c = sim.counts();
    assert!(c.gene_conversion + c.noneffective_gene_conversion > 0);
    assert_eq!(c.recombination, 0);
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    to_tree_sequence(&tables);
}

#[test]
fn test_full_arg() {
    let config = SimulationBuilder::new()
        .num_samples(5)
        .reference_size(100.0)
        .recombination_map(RateMap::uniform(1e3, 1e-4, false).unwrap())
        .options(SimulationOptions::default().with_full_arg())
        .build()
        .unwrap();
    let (sim, tables) = run_to_completion(config, 92);
    assert_eq!(
        count_flagged(&tables, NodeFlags::is_recombination) as u64,
        2 * sim.counts().recombination
    );
    assert_eq!(
        count_flagged(&tables, NodeFlags::is_common_ancestor) as u64,
        sim.counts().common_ancestor
    );
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    to_tree_sequence(&tables);
}

#[test]
fn test_resume_from_tables() {
    let map = RateMap::uniform(1e3, 1e-5, false).unwrap();
    let config = SimulationBuilder::new()
        .num_samples(8)
        .reference_size(1e3)
        .recombination_map(map.clone())
        .build()
        .unwrap();
    let mut first = Simulator::new(config, 93);
    assert_eq!(first.run(50.0).unwrap(), SimulationState::Paused);
    let partial = first.finalize().unwrap();

    let config = SimulationBuilder::new()
        .reference_size(1e3)
        .recombination_map(map)
        .starting_tables(partial.clone())
        .build()
        .unwrap();
    assert_eq!(config.start_time(), 50.0);
    let mut second = Simulator::new(config, 94);
    assert_eq!(second.time(), 50.0);
    assert_eq!(second.num_lineages(), first.num_lineages());
    assert_eq!(second.run(f64::INFINITY).unwrap(), SimulationState::Completed);
    let tables = second.finalize().unwrap();
    assert!(tables.num_nodes() >= partial.num_nodes());
    assert_fully_coalesced(&tables);
    assert_edges_consistent(&tables);
    to_tree_sequence(&tables);
}
