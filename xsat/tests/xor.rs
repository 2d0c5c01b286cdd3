//! End to end tests of the XOR reasoning.

use proptest::prelude::*;

use rand::{rngs::StdRng, Rng, SeedableRng};

use xsat::{Lit, Solver, Var};

/// Solve a random linear system over GF(2) and check the solution against the equations.
///
/// A system generated from a planted solution is satisfiable and the connected equations form a
/// single Gaussian elimination matrix.
fn check_linear_system(seed: u64, var_count: usize, equation_count: usize) {
    let mut rng = StdRng::seed_from_u64(seed);

    let solution: Vec<bool> = (0..var_count).map(|_| rng.gen()).collect();

    let mut solver = Solver::new();
    let mut equations = vec![];

    for _ in 0..equation_count {
        let width = rng.gen_range(3, 6.min(var_count));
        let mut vars: Vec<usize> = (0..var_count).collect();
        for i in 0..width {
            let j = rng.gen_range(i, var_count);
            vars.swap(i, j);
        }
        vars.truncate(width);

        let rhs = vars
            .iter()
            .fold(false, |parity, &index| parity ^ solution[index]);

        let xor_vars: Vec<Var> = vars.iter().map(|&index| Var::from_index(index)).collect();
        solver.add_xor_clause(&xor_vars, rhs);
        equations.push((xor_vars, rhs));
    }

    assert_eq!(solver.solve().ok(), Some(true));

    let model = solver.model().unwrap();
    let value = |var: Var| model.contains(&var.positive());

    for (vars, rhs) in equations {
        let parity = vars.iter().fold(false, |parity, &var| parity ^ value(var));
        assert_eq!(parity, rhs);
    }
}

#[test]
fn planted_linear_systems() {
    for seed in 0..8 {
        check_linear_system(seed, 16, 12);
    }
}

#[test]
fn inconsistent_linear_system_is_unsat() {
    let mut solver = Solver::new();

    // Summing the first two equations gives 1 + 4 = 0, contradicting the third.
    solver.add_xor_clause(&[Var::from_dimacs(1), Var::from_dimacs(2), Var::from_dimacs(3)], true);
    solver.add_xor_clause(&[Var::from_dimacs(2), Var::from_dimacs(3), Var::from_dimacs(4)], true);
    solver.add_xor_clause(&[Var::from_dimacs(1), Var::from_dimacs(4)], true);

    assert_eq!(solver.solve().ok(), Some(false));
}

#[test]
fn xor_via_dimacs() {
    let input = b"p cnf 4 3\nx 1 2 3 0\nx -3 4 0\n1 -4 0\n";

    let mut solver = Solver::new();
    solver.add_dimacs_cnf(&input[..]).unwrap();

    assert_eq!(solver.solve().ok(), Some(true));

    let model = solver.model().unwrap();
    let value = |var: isize| model.contains(&Lit::from_dimacs(var));

    assert_eq!(value(1) ^ value(2) ^ value(3), true);
    // x -3 4 means 3 + 4 = 0.
    assert_eq!(value(3) ^ value(4), false);
    assert!(value(1) || !value(4));
}

#[test]
fn cnf_encoded_xor_is_recovered() {
    // The four clauses encode 1 + 2 + 3 = 1; together with two XOR constraints the formula
    // forces a unique parity for every variable.
    let mut solver = Solver::new();

    solver.add_clause(&[Lit::from_dimacs(1), Lit::from_dimacs(2), Lit::from_dimacs(3)]);
    solver.add_clause(&[Lit::from_dimacs(1), Lit::from_dimacs(-2), Lit::from_dimacs(-3)]);
    solver.add_clause(&[Lit::from_dimacs(-1), Lit::from_dimacs(2), Lit::from_dimacs(-3)]);
    solver.add_clause(&[Lit::from_dimacs(-1), Lit::from_dimacs(-2), Lit::from_dimacs(3)]);

    solver.add_xor_clause(&[Var::from_dimacs(1), Var::from_dimacs(2)], false);
    solver.add_xor_clause(&[Var::from_dimacs(2), Var::from_dimacs(3)], false);

    assert_eq!(solver.solve().ok(), Some(true));

    let model = solver.model().unwrap();
    let value = |var: isize| model.contains(&Lit::from_dimacs(var));

    // 1 = 2 = 3 and 1 + 2 + 3 = 1 forces all three true.
    assert!(value(1) && value(2) && value(3));
}

proptest! {
    #[test]
    fn random_xor_systems_match_brute_force(
        system in proptest::collection::vec(
            (proptest::collection::btree_set(0..6usize, 1..4), proptest::bool::ANY),
            1..8,
        ),
    ) {
        let mut solver = Solver::new();

        for (vars, rhs) in system.iter() {
            let xor_vars: Vec<Var> = vars.iter().map(|&index| Var::from_index(index)).collect();
            solver.add_xor_clause(&xor_vars, *rhs);
        }

        let expected = (0..1u32 << 6).any(|assignment| {
            system.iter().all(|(vars, rhs)| {
                let parity = vars
                    .iter()
                    .fold(false, |parity, &index| parity ^ (assignment & (1 << index) != 0));
                parity == *rhs
            })
        });

        let result = solver.solve().ok();
        prop_assert_eq!(result, Some(expected));

        if expected {
            let model = solver.model().unwrap();
            for (vars, rhs) in system.iter() {
                let parity = vars.iter().fold(false, |parity, &index| {
                    parity ^ model.contains(&Var::from_index(index).positive())
                });
                prop_assert_eq!(parity, *rhs);
            }
        }
    }
}
