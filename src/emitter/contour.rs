//! Outer boundaries of the connected regions of a binary plane.

use ndarray::{Array2, ArrayView2};

/// Moore neighbourhood, clockwise from west, as `(row, column)` steps.
const NEIGHBOURS: [(isize, isize); 8] = [
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
];

/// A closed boundary as `(row, column)` pixel indices, first point not repeated.
pub type Contour = Vec<(usize, usize)>;

/// Trace the outer boundary of every 8-connected region of `plane`.
///
/// Regions are reported in raster order of their top-left pixel. Holes are
/// not traced.
pub fn trace_contours(plane: ArrayView2<'_, bool>) -> Vec<Contour> {
    let (rows, columns) = plane.dim();
    let mut visited = Array2::<bool>::from_elem((rows, columns), false);
    let mut contours = Vec::new();

    for r in 0..rows {
        for c in 0..columns {
            if plane[[r, c]] && !visited[[r, c]] {
                mark_region(plane, &mut visited, (r, c));
                contours.push(trace_boundary(plane, (r, c)));
            }
        }
    }
    contours
}

fn inside(plane: ArrayView2<'_, bool>, (r, c): (isize, isize)) -> bool {
    let (rows, columns) = plane.dim();
    r >= 0
        && c >= 0
        && (r as usize) < rows
        && (c as usize) < columns
        && plane[[r as usize, c as usize]]
}

fn mark_region(plane: ArrayView2<'_, bool>, visited: &mut Array2<bool>, seed: (usize, usize)) {
    let mut stack = vec![seed];
    visited[seed] = true;
    while let Some((r, c)) = stack.pop() {
        for (dr, dc) in NEIGHBOURS {
            let n = (r as isize + dr, c as isize + dc);
            if inside(plane, n) {
                let n = (n.0 as usize, n.1 as usize);
                if !visited[n] {
                    visited[n] = true;
                    stack.push(n);
                }
            }
        }
    }
}

/// Moore-neighbour tracing, stopping when the first move is about to repeat.
///
/// `start` must be the first foreground pixel of its region in raster order,
/// so its west neighbour is background.
fn trace_boundary(plane: ArrayView2<'_, bool>, start: (usize, usize)) -> Contour {
    let start_pos = (start.0 as isize, start.1 as isize);
    let mut contour = vec![start];

    let mut current = start_pos;
    let mut backtrack = (start_pos.0, start_pos.1 - 1);
    let mut first_move = None;
    // Each boundary pixel can be entered from at most 8 directions.
    let limit = 8 * plane.len() + 8;

    for _ in 0..limit {
        let from = direction_index(backtrack.0 - current.0, backtrack.1 - current.1);
        let mut next = None;
        let mut last_background = backtrack;
        for step in 1..=8 {
            let (dr, dc) = NEIGHBOURS[(from + step) % 8];
            let candidate = (current.0 + dr, current.1 + dc);
            if inside(plane, candidate) {
                next = Some(candidate);
                break;
            }
            last_background = candidate;
        }

        let Some(next) = next else {
            // isolated pixel
            break;
        };
        let state = (next, last_background);
        match first_move {
            None => first_move = Some(state),
            Some(first) if first == state => break,
            Some(_) => {}
        }
        current = next;
        backtrack = last_background;
        contour.push((current.0 as usize, current.1 as usize));
    }

    if contour.len() > 1 && contour.last() == Some(&start) {
        contour.pop();
    }
    contour
}

fn direction_index(dr: isize, dc: isize) -> usize {
    NEIGHBOURS
        .iter()
        .position(|&d| d == (dr, dc))
        .unwrap_or(0)
}
