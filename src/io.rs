//! XYZ output for single geometries and band trajectories.

use crate::chain::Chain;
use crate::geometry::Geometry;
use std::fs;
use std::io::Result;
use std::path::Path;

/// Formats one XYZ frame with `comment` on the second line.
pub fn xyz_frame(geom: &Geometry, comment: &str) -> String {
    let mut content = format!("{}\n{}\n", geom.num_atoms, comment);
    for i in 0..geom.num_atoms {
        let coords = geom.get_atom_coords(i);
        content.push_str(&format!(
            "{}  {:.8}  {:.8}  {:.8}\n",
            geom.elements[i], coords[0], coords[1], coords[2]
        ));
    }
    content
}

/// Writes a molecular geometry to an XYZ file.
///
/// # Examples
///
/// ```
/// use openneb::geometry::Geometry;
/// use openneb::io;
///
/// fn main() -> std::io::Result<()> {
///     let dir = tempfile::TempDir::new()?;
///     let path = dir.path().join("molecule.xyz");
///     let geometry = Geometry::new(
///         vec!["C".to_string(), "H".to_string()],
///         vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0],
///     );
///     io::write_xyz(&geometry, "", &path)?;
///     assert!(std::fs::read_to_string(&path)?.starts_with("2\n"));
///     Ok(())
/// }
/// ```
pub fn write_xyz(geom: &Geometry, comment: &str, path: &Path) -> Result<()> {
    fs::write(path, xyz_frame(geom, comment))
}

/// Writes every image of a chain as a multi-frame XYZ trajectory.
///
/// The comment line of each frame reads `image {k} energy {E}` with the
/// energy in Hartree, or `energy n/a` for images never evaluated.
pub fn write_path_xyz(chain: &Chain, path: &Path) -> Result<()> {
    let mut content = String::new();
    for (k, image) in chain.images().iter().enumerate() {
        let comment = match image.energy {
            Some(energy) => format!("image {} energy {:.10}", k, energy),
            None => format!("image {} energy n/a", k),
        };
        content.push_str(&xyz_frame(&image.geometry, &comment));
    }
    fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;
    use tempfile::TempDir;

    #[test]
    fn test_xyz_frame_layout() {
        let geom = Geometry::new(vec!["O".to_string()], vec![0.0, 1.5, -2.0]);
        let frame = xyz_frame(&geom, "ts");
        let lines: Vec<&str> = frame.lines().collect();
        assert_eq!(lines, vec!["1", "ts", "O  0.00000000  1.50000000  -2.00000000"]);
    }

    #[test]
    fn test_write_path_xyz() {
        let dir = TempDir::new().unwrap();
        let geometries = (0..3)
            .map(|i| Geometry::new(vec!["H".to_string()], vec![i as f64, 0.0, 0.0]))
            .collect();
        let mut chain = Chain::from_geometries(geometries).unwrap();
        chain
            .interior_mut(1)
            .unwrap()
            .set_evaluation(0.25, DVector::zeros(3));

        let path = dir.path().join("neb_path.xyz");
        write_path_xyz(&chain, &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();

        assert_eq!(content.lines().count(), 9);
        assert!(content.contains("image 0 energy n/a"));
        assert!(content.contains("image 1 energy 0.2500000000"));
    }
}
