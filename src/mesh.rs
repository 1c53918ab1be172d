//! Triangle meshes produced by marching cubes.
//!
//! The mesh system provides:
//! - Shared-vertex storage with per-vertex normals
//! - Face centroids and face normals maintained as faces are added
//! - Optional per-vertex scalar field and per-face mesh index overlays
//! - Plane clipping, merging and surface area
//! - OBJ text output and a JSON archive record carrying the overlays

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::AddAssign;
use std::path::Path;

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{CLIP_THRESHOLD, INDEX_FIELD_OFFSET};
use crate::error::{Error, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Unit square in the z = 0 plane split into two triangles.
    fn square() -> Mesh {
        let mut mesh = Mesh::new();
        let n = Vector3::z();
        let a = mesh.add_vertex(Point3::new(0.0, 0.0, 0.0), n);
        let b = mesh.add_vertex(Point3::new(1.0, 0.0, 0.0), n);
        let c = mesh.add_vertex(Point3::new(1.0, 1.0, 0.0), n);
        let d = mesh.add_vertex(Point3::new(0.0, 1.0, 0.0), n);
        mesh.add_face([a, b, c]);
        mesh.add_face([a, c, d]);
        mesh
    }

    /// Closed tetrahedron with outward winding.
    fn tetrahedron() -> Mesh {
        let mut mesh = Mesh::new();
        let p = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ];
        let centre = Point3::new(0.25, 0.25, 0.25);
        let v: Vec<usize> = p
            .iter()
            .map(|q| mesh.add_vertex(*q, (q - centre).normalize()))
            .collect();
        mesh.add_face([v[0], v[2], v[1]]);
        mesh.add_face([v[0], v[1], v[3]]);
        mesh.add_face([v[0], v[3], v[2]]);
        mesh.add_face([v[1], v[2], v[3]]);
        mesh
    }

    #[test]
    fn faces_track_centroid_and_normal() {
        let mesh = square();
        assert_eq!(mesh.n_vertices(), 4);
        assert_eq!(mesh.n_faces(), 2);
        assert_relative_eq!(mesh.face_normals()[0], Vector3::z(), epsilon = 1e-12);
        assert_relative_eq!(
            mesh.face_centroids()[1],
            Point3::new(1.0 / 3.0, 2.0 / 3.0, 0.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn area_is_twice_geometric_area() {
        let mesh = square();
        assert_relative_eq!(mesh.area(), 2.0, epsilon = 1e-12);
        assert_relative_eq!(mesh.geometric_area(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn tetrahedron_normals_point_outwards() {
        let mesh = tetrahedron();
        let centre = Point3::new(0.25, 0.25, 0.25);
        for (c, n) in mesh.face_centroids().iter().zip(mesh.face_normals()) {
            assert!(n.dot(&(c - centre)) > 0.0);
        }
    }

    #[test]
    fn merge_remaps_faces_and_copies_overlays() {
        let mut a = square();
        a.set_mesh_index(1);
        let mut b = tetrahedron();
        b.set_mesh_index(7);
        b.compute_scalar_field(|p| p.x + p.y);

        a += &b;
        assert_eq!(a.n_vertices(), 8);
        assert_eq!(a.n_faces(), 6);
        assert_eq!(a.faces()[2], [4, 6, 5]);
        assert_eq!(a.mesh_index().unwrap(), &[1, 1, 7, 7, 7, 7]);
        let field = a.scalar_field().unwrap();
        assert_eq!(field.len(), 8);
        assert_eq!(field[0], 0.0);
        assert_eq!(field[5], 1.0);
    }

    #[test]
    fn index_field_marks_vertices_with_face_index() {
        let mut mesh = tetrahedron();
        mesh.set_mesh_index(3);
        mesh.compute_index_field();
        let field = mesh.scalar_field().unwrap();
        assert!(field.iter().all(|&v| v == 3.0 + INDEX_FIELD_OFFSET));
        let expected = 3.0 + INDEX_FIELD_OFFSET;
        assert_eq!(mesh.scalar_field_range(), (expected, expected));
    }

    #[test]
    fn scalar_range_without_field_is_zero() {
        assert_eq!(square().scalar_field_range(), (0.0, 0.0));
    }

    #[test]
    fn clip_keeps_front_half() {
        let mut mesh = square();
        mesh.compute_scalar_field(|p| p.x);
        // keep x >= 0.5
        mesh.clip(&Vector3::x(), &Point3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(mesh.geometric_area(), 0.5, epsilon = 1e-12);
        assert!(mesh.vertices().iter().all(|p| p.x >= 0.5 - 1e-12));
        assert_eq!(mesh.scalar_field().unwrap().len(), mesh.n_vertices());
        for (p, v) in mesh.vertices().iter().zip(mesh.scalar_field().unwrap()) {
            assert_relative_eq!(p.x, *v, epsilon = 1e-12);
        }
        for n in mesh.face_normals() {
            assert_relative_eq!(*n, Vector3::z(), epsilon = 1e-12);
        }
    }

    #[test]
    fn clip_removes_everything_behind_plane() {
        let mut mesh = square();
        mesh.clip(&Vector3::x(), &Point3::new(2.0, 0.0, 0.0));
        assert_eq!(mesh.n_faces(), 0);
        assert_eq!(mesh.n_vertices(), 0);
    }

    #[test]
    fn clip_shares_intersection_vertices() {
        let mut mesh = square();
        mesh.clip(&Vector3::new(1.0, 1.0, 0.0).normalize(), &Point3::new(0.6, 0.6, 0.0));
        // the diagonal edge a-c is cut once for both faces
        let on_plane = mesh
            .vertices()
            .iter()
            .filter(|p| (p.x + p.y - 1.2).abs() < 1e-9)
            .count();
        assert_eq!(on_plane, 3);
        assert_relative_eq!(mesh.geometric_area(), 0.5 * 0.8 * 0.8, epsilon = 1e-12);
    }

    #[test]
    fn orphans_are_removed() {
        let mut mesh = square();
        mesh.add_vertex(Point3::new(5.0, 5.0, 5.0), Vector3::z());
        mesh.compute_scalar_field(|p| p.z);
        assert_eq!(mesh.remove_orphans(), 1);
        assert_eq!(mesh.n_vertices(), 4);
        assert_eq!(mesh.scalar_field().unwrap(), &[0.0; 4]);
    }

    #[test]
    fn obj_text_reads_back() {
        let mesh = tetrahedron();
        let text = mesh.to_obj_string().unwrap();
        assert!(text.contains("f 1//1 2//2 3//3"));
        let restored = Mesh::read_obj(text.as_bytes()).unwrap();
        assert_eq!(restored.n_vertices(), 4);
        assert_eq!(restored.n_faces(), 4);
        for (a, b) in restored.faces().iter().zip(mesh.faces()) {
            for (&u, &v) in a.iter().zip(b) {
                assert_relative_eq!(restored.vertices()[u], mesh.vertices()[v], epsilon = 1e-6);
                assert_relative_eq!(
                    restored.vertex_normals()[u],
                    mesh.vertex_normals()[v],
                    epsilon = 1e-6
                );
            }
        }
        assert_relative_eq!(restored.area(), mesh.area(), epsilon = 1e-5);
    }

    #[test]
    fn archive_keeps_overlays_in_vertex_order() {
        // the first face does not list vertices in storage order
        let mut mesh = tetrahedron();
        mesh.compute_scalar_field(|p| 10.0 * p.x + p.y);
        mesh.set_mesh_index(4);

        let json = serde_json::to_string(&mesh.to_record().unwrap()).unwrap();
        let record: MeshRecord = serde_json::from_str(&json).unwrap();
        let restored = Mesh::from_record(&record).unwrap();

        assert_eq!(restored.mesh_index().unwrap(), &[4, 4, 4, 4]);
        for (p, v) in restored.vertices().iter().zip(restored.scalar_field().unwrap()) {
            assert_relative_eq!(10.0 * p.x + p.y, *v, epsilon = 1e-5);
        }
    }

    #[test]
    fn mismatched_overlays_are_ignored() {
        let mesh = square();
        let mut record = mesh.to_record().unwrap();
        record.scalar_field = vec![1.0, 2.0];
        record.mesh_index = vec![0, 0];
        let restored = Mesh::from_record(&record).unwrap();
        assert!(restored.scalar_field().is_none());
        assert_eq!(restored.mesh_index().unwrap(), &[0, 0]);
    }
}

pub type Face = [usize; 3];

/// A shared-vertex triangle mesh.
///
/// **Context**: Each isosurface is held as one or two of these (positive and
/// negative lobes). The renderer needs vertex normals for shading and face
/// normals and centroids for transparency sorting, so those are kept in step
/// with the faces.
///
/// **How it Works**: Vertices, vertex normals, faces and the per-face
/// centroid and normal live in parallel arrays indexed by vertex or face
/// id. The optional overlays, when present, always have one entry per
/// vertex (scalar field) or per face (mesh index). Operations that remove
/// elements compact the arrays, so ids are only stable between edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mesh {
    vertices: Vec<Point3<f64>>,
    normals: Vec<Vector3<f64>>,
    faces: Vec<Face>,
    face_centroids: Vec<Point3<f64>>,
    face_normals: Vec<Vector3<f64>>,
    scalar_field: Option<Vec<f64>>,
    mesh_index: Option<Vec<i32>>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mesh from raw arrays, computing the face properties.
    pub fn from_parts(vertices: Vec<Point3<f64>>, normals: Vec<Vector3<f64>>, faces: Vec<Face>) -> Self {
        let mut mesh = Self {
            vertices,
            normals,
            ..Self::default()
        };
        mesh.normals.resize(mesh.vertices.len(), Vector3::zeros());
        for face in faces {
            mesh.add_face(face);
        }
        mesh
    }

    /// Attaches overlays to a freshly built mesh. Overlays of the wrong
    /// length are dropped.
    pub(crate) fn with_overlays(
        mut self,
        scalar_field: Option<Vec<f64>>,
        mesh_index: Option<Vec<i32>>,
    ) -> Self {
        self.scalar_field = scalar_field.filter(|f| f.len() == self.vertices.len());
        self.mesh_index = mesh_index.filter(|i| i.len() == self.faces.len());
        self
    }

    pub fn add_vertex(&mut self, point: Point3<f64>, normal: Vector3<f64>) -> usize {
        self.vertices.push(point);
        self.normals.push(normal);
        if let Some(field) = &mut self.scalar_field {
            field.push(0.0);
        }
        self.vertices.len() - 1
    }

    pub fn add_face(&mut self, face: Face) -> usize {
        let [a, b, c] = face.map(|v| self.vertices[v]);
        self.face_centroids
            .push(Point3::from((a.coords + b.coords + c.coords) / 3.0));
        self.face_normals.push(face_normal(&a, &b, &c));
        self.faces.push(face);
        if let Some(index) = &mut self.mesh_index {
            index.push(0);
        }
        self.faces.len() - 1
    }

    pub fn vertices(&self) -> &[Point3<f64>] {
        &self.vertices
    }

    pub fn vertex_normals(&self) -> &[Vector3<f64>] {
        &self.normals
    }

    pub fn set_vertex_normal(&mut self, vertex: usize, normal: Vector3<f64>) {
        self.normals[vertex] = normal;
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn face_centroids(&self) -> &[Point3<f64>] {
        &self.face_centroids
    }

    pub fn face_normals(&self) -> &[Vector3<f64>] {
        &self.face_normals
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    pub fn scalar_field(&self) -> Option<&[f64]> {
        self.scalar_field.as_deref()
    }

    pub fn mesh_index(&self) -> Option<&[i32]> {
        self.mesh_index.as_deref()
    }

    /// Stamps every face with `index`.
    pub fn set_mesh_index(&mut self, index: i32) {
        self.mesh_index = Some(vec![index; self.faces.len()]);
    }

    /// Sets the scalar field from a function of vertex position.
    pub fn compute_scalar_field<F: Fn(&Point3<f64>) -> f64>(&mut self, f: F) {
        self.scalar_field = Some(self.vertices.iter().map(f).collect());
    }

    /// Copies each face's mesh index onto its vertices as a scalar field.
    ///
    /// The small offset keeps a later truncation from landing on the
    /// integer below. Faces without an index count as index 0.
    pub fn compute_index_field(&mut self) {
        let n_faces = self.faces.len();
        let index = self.mesh_index.get_or_insert_with(|| vec![0; n_faces]);
        let mut field = self
            .scalar_field
            .take()
            .unwrap_or_else(|| vec![0.0; self.vertices.len()]);
        for (face, &i) in self.faces.iter().zip(index.iter()) {
            for &v in face {
                field[v] = f64::from(i) + INDEX_FIELD_OFFSET;
            }
        }
        self.scalar_field = Some(field);
    }

    pub fn clear_scalar_field(&mut self) {
        self.scalar_field = None;
    }

    /// Smallest and largest scalar field value, `(0, 0)` without a field.
    pub fn scalar_field_range(&self) -> (f64, f64) {
        match self.scalar_field.as_deref() {
            Some(field) if !field.is_empty() => field
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                }),
            _ => (0.0, 0.0),
        }
    }

    /// Sum of the triangle cross-product magnitudes, twice the geometric area.
    pub fn area(&self) -> f64 {
        self.faces
            .iter()
            .map(|face| {
                let [a, b, c] = face.map(|v| self.vertices[v]);
                (a - b).cross(&(b - c)).norm()
            })
            .sum()
    }

    pub fn geometric_area(&self) -> f64 {
        0.5 * self.area()
    }

    /// Cuts away the part of the mesh behind the plane through `point` with
    /// normal `normal`.
    ///
    /// Faces wholly behind (or on) the plane are dropped. Faces crossing it
    /// are re-triangulated at the plane, with the new vertices shared between
    /// neighbouring faces. Vertices left without faces are removed.
    pub fn clip(&mut self, normal: &Vector3<f64>, point: &Point3<f64>) {
        let distance: Vec<f64> = self.vertices.iter().map(|p| normal.dot(&(p - point))).collect();
        let on_plane = |v: usize| distance[v].abs() < CLIP_THRESHOLD;
        let clipped = |v: usize| !on_plane(v) && distance[v] < 0.0;

        let faces = std::mem::take(&mut self.faces);
        let index = self.mesh_index.take();
        self.face_centroids.clear();
        self.face_normals.clear();

        let mut kept_index = Vec::with_capacity(faces.len());
        let mut cuts: HashMap<(usize, usize), usize> = HashMap::new();

        for (f, face) in faces.into_iter().enumerate() {
            let n_clipped = face.iter().filter(|&&v| clipped(v)).count();
            let n_plane = face.iter().filter(|&&v| on_plane(v)).count();

            let replacement: Vec<Face> = match (n_clipped, n_plane) {
                (c, p) if c + p == 3 => Vec::new(),
                (0, _) => vec![face],
                (1, 0) => {
                    // rotate so the clipped vertex comes first
                    let [a, b, c] = rotate_to(face, |v| clipped(v));
                    let v1 = self.cut(&mut cuts, normal, point, a, b);
                    let v2 = self.cut(&mut cuts, normal, point, a, c);
                    vec![[v1, b, c], [v1, c, v2]]
                }
                (1, 1) => {
                    let [a, b, c] = rotate_to(face, |v| clipped(v));
                    let front = if on_plane(b) { c } else { b };
                    let v = self.cut(&mut cuts, normal, point, a, front);
                    vec![[v, b, c]]
                }
                (2, 0) => {
                    let [a, b, c] = rotate_to(face, |v| !clipped(v));
                    let v1 = self.cut(&mut cuts, normal, point, c, a);
                    let v2 = self.cut(&mut cuts, normal, point, b, a);
                    vec![[v1, a, v2]]
                }
                _ => vec![face],
            };

            for new_face in replacement {
                self.add_face(new_face);
                if let Some(index) = &index {
                    kept_index.push(index[f]);
                }
            }
        }

        if index.is_some() {
            self.mesh_index = Some(kept_index);
        }
        let removed = self.remove_orphans();
        debug!("clipping removed {} vertices", removed);
    }

    /// Vertex where the edge from `a` to `b` crosses the plane, created once
    /// per edge.
    fn cut(
        &mut self,
        cuts: &mut HashMap<(usize, usize), usize>,
        normal: &Vector3<f64>,
        point: &Point3<f64>,
        a: usize,
        b: usize,
    ) -> usize {
        let key = (a.min(b), a.max(b));
        if let Some(&v) = cuts.get(&key) {
            return v;
        }

        let (pa, pb) = (self.vertices[a], self.vertices[b]);
        let ab = pb - pa;
        let numerator = normal.dot(&(point - pa));
        let denominator = normal.dot(&ab);
        let t = if numerator.abs() < CLIP_THRESHOLD {
            0.0
        } else if denominator.abs() < CLIP_THRESHOLD {
            warn!("found an edge parallel to the clipping plane");
            0.0
        } else {
            numerator / denominator
        };

        let v = self.add_vertex(
            pa + ab * t,
            self.normals[a] * (1.0 - t) + self.normals[b] * t,
        );
        if let Some(field) = &mut self.scalar_field {
            field[v] = field[a] * (1.0 - t) + field[b] * t;
        }
        cuts.insert(key, v);
        v
    }

    /// Deletes vertices that belong to no face and returns how many went.
    pub fn remove_orphans(&mut self) -> usize {
        let mut used = vec![false; self.vertices.len()];
        for face in &self.faces {
            for &v in face {
                used[v] = true;
            }
        }

        let mut remap = vec![usize::MAX; self.vertices.len()];
        let mut next = 0;
        for (v, &keep) in used.iter().enumerate() {
            if keep {
                remap[v] = next;
                next += 1;
            }
        }
        let removed = self.vertices.len() - next;
        if removed == 0 {
            return 0;
        }

        let keep = |v: &usize| used[*v];
        self.vertices = retain_by(&self.vertices, keep);
        self.normals = retain_by(&self.normals, keep);
        if let Some(field) = &self.scalar_field {
            self.scalar_field = Some(retain_by(field, keep));
        }
        for face in &mut self.faces {
            *face = face.map(|v| remap[v]);
        }
        removed
    }

    /// Vertex ids in order of first use by a face, then any unused ones.
    fn obj_order(&self) -> Vec<usize> {
        let mut seen = vec![false; self.vertices.len()];
        let mut order = Vec::with_capacity(self.vertices.len());
        for &v in self.faces.iter().flatten() {
            if !seen[v] {
                seen[v] = true;
                order.push(v);
            }
        }
        order.extend((0..self.vertices.len()).filter(|&v| !seen[v]));
        order
    }

    /// Writes the mesh as Wavefront OBJ with vertex normals.
    ///
    /// Vertices are numbered in order of first use so that an OBJ reader
    /// restores them in the same order as [`Mesh::to_record`] lists the
    /// scalar field.
    pub fn write_obj<W: Write>(&self, writer: &mut W) -> Result<()> {
        let order = self.obj_order();
        let mut position = vec![0; self.vertices.len()];
        for (n, &v) in order.iter().enumerate() {
            position[v] = n + 1;
        }

        writeln!(writer, "# {} vertices, {} faces", self.n_vertices(), self.n_faces())?;
        for &v in &order {
            let p = self.vertices[v];
            writeln!(writer, "v {} {} {}", p.x, p.y, p.z)?;
        }
        for &v in &order {
            let n = self.normals[v];
            writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
        }
        for face in &self.faces {
            let [a, b, c] = face.map(|v| position[v]);
            writeln!(writer, "f {a}//{a} {b}//{b} {c}//{c}")?;
        }
        Ok(())
    }

    pub fn to_obj_string(&self) -> Result<String> {
        let mut buffer = Vec::new();
        self.write_obj(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| Error::MeshFormat(e.to_string()))
    }

    pub fn save_obj(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_obj(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads OBJ text. All objects in the input are merged into one mesh.
    pub fn read_obj<R: BufRead>(mut reader: R) -> Result<Self> {
        let options = tobj::LoadOptions {
            triangulate: true,
            single_index: false,
            ..Default::default()
        };
        let (models, _) =
            tobj::load_obj_buf(&mut reader, &options, |_| Err(tobj::LoadError::OpenFileFailed))?;

        let mut mesh = Mesh::new();
        for model in &models {
            mesh += &Self::from_tobj(&model.mesh);
        }
        Ok(mesh)
    }

    /// Loads a surface from an OBJ file.
    pub fn from_obj_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_obj(BufReader::new(File::open(path)?))
    }

    fn from_tobj(source: &tobj::Mesh) -> Self {
        let vertices: Vec<Point3<f64>> = source
            .positions
            .chunks_exact(3)
            .map(|p| Point3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])))
            .collect();

        let mut normals = vec![Vector3::zeros(); vertices.len()];
        for (&v, &n) in source.indices.iter().zip(&source.normal_indices) {
            let n = 3 * n as usize;
            if let Some(xyz) = source.normals.get(n..n + 3) {
                normals[v as usize] =
                    Vector3::new(f64::from(xyz[0]), f64::from(xyz[1]), f64::from(xyz[2]));
            }
        }

        let faces = source
            .indices
            .chunks_exact(3)
            .map(|f| [f[0] as usize, f[1] as usize, f[2] as usize])
            .collect();
        Mesh::from_parts(vertices, normals, faces)
    }

    /// Archive form of the mesh: OBJ text plus the overlays in OBJ order.
    pub fn to_record(&self) -> Result<MeshRecord> {
        let scalar_field = match &self.scalar_field {
            Some(field) => self.obj_order().into_iter().map(|v| field[v]).collect(),
            None => Vec::new(),
        };
        Ok(MeshRecord {
            obj: self.to_obj_string()?,
            scalar_field,
            mesh_index: self.mesh_index.clone().unwrap_or_default(),
        })
    }

    /// Restores a mesh from its archive form.
    ///
    /// An overlay whose length does not match the restored vertex or face
    /// count is dropped.
    pub fn from_record(record: &MeshRecord) -> Result<Self> {
        let mut mesh = Self::read_obj(record.obj.as_bytes())?;
        if !record.scalar_field.is_empty() && record.scalar_field.len() == mesh.n_vertices() {
            mesh.scalar_field = Some(record.scalar_field.clone());
        }
        if !record.mesh_index.is_empty() && record.mesh_index.len() == mesh.n_faces() {
            mesh.mesh_index = Some(record.mesh_index.clone());
        }
        Ok(mesh)
    }
}

impl AddAssign<&Mesh> for Mesh {
    /// Appends `other`, copying its overlays onto the new elements.
    fn add_assign(&mut self, other: &Mesh) {
        let offset = self.vertices.len();
        let face_offset = self.faces.len();

        if other.scalar_field.is_some() && self.scalar_field.is_none() {
            self.scalar_field = Some(vec![0.0; offset]);
        }
        if other.mesh_index.is_some() && self.mesh_index.is_none() {
            self.mesh_index = Some(vec![0; face_offset]);
        }

        for (p, n) in other.vertices.iter().zip(&other.normals) {
            self.add_vertex(*p, *n);
        }
        for face in &other.faces {
            self.add_face(face.map(|v| v + offset));
        }

        if let (Some(field), Some(theirs)) = (&mut self.scalar_field, &other.scalar_field) {
            field[offset..].copy_from_slice(theirs);
        }
        if let (Some(index), Some(theirs)) = (&mut self.mesh_index, &other.mesh_index) {
            index[face_offset..].copy_from_slice(theirs);
        }
    }
}

/// A mesh as stored in a surface archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshRecord {
    pub obj: String,
    pub scalar_field: Vec<f64>,
    pub mesh_index: Vec<i32>,
}

fn face_normal(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Vector3<f64> {
    (b - a)
        .cross(&(c - a))
        .try_normalize(f64::EPSILON)
        .unwrap_or_else(Vector3::zeros)
}

/// Cyclic rotation of `face` that puts the first vertex satisfying `pick`
/// in front, preserving the winding.
fn rotate_to<P: Fn(usize) -> bool>(face: Face, pick: P) -> Face {
    let [a, b, c] = face;
    if pick(a) {
        [a, b, c]
    } else if pick(b) {
        [b, c, a]
    } else {
        [c, a, b]
    }
}

fn retain_by<T: Copy, K: Fn(&usize) -> bool>(items: &[T], keep: K) -> Vec<T> {
    items
        .iter()
        .enumerate()
        .filter(|(i, _)| keep(i))
        .map(|(_, x)| *x)
        .collect()
}
