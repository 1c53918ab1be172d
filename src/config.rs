pub const BOHR_TO_ANGSTROM: f64 = 0.529177249; // length conversion used by checkpoint data
pub const ANGSTROM_TO_BOHR: f64 = 1.0 / BOHR_TO_ANGSTROM;
pub const SHELL_THRESHOLD: f64 = 0.001; // primitive magnitude below which a shell is ignored
pub const SHELL_RADIUS_STEP: f64 = 0.5; // outward step when searching for the significant radius
pub const SHELL_MAX_RADIUS: f64 = 100.0;
pub const MAX_SHELL_FUNCTIONS: usize = 15; // functions in the largest shell (G15)
pub const GRID_TOLERANCE: f64 = 1e-5; // origin and spacing tolerance for grid size equality
pub const DEFAULT_QUALITY: u8 = 3;
pub const DEFAULT_STEP_SIZE: f64 = 0.25;
pub const COARSE_GRAIN_FACTOR: f64 = 0.125; // fraction of the threshold that triggers refinement
pub const DEFAULT_EVALUATION_THRESHOLD: f64 = 0.001;
pub const MARCHING_CUBES_MARGIN: usize = 2; // cells skipped at each grid boundary
pub const CLIP_THRESHOLD: f64 = 1e-6; // distance below which a vertex lies on the clip plane
pub const INDEX_FIELD_OFFSET: f64 = 0.0001;
pub const DECIMATION_MAX_QUADRIC_ERROR: f64 = 1e-4;
pub const DECIMATION_MIN_NORMAL_DOT: f64 = 0.5; // collapses may not tilt a face further than this
