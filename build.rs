fn main() {
    build_deps::rerun_if_changed_paths("res/examples/**/*.kozi").expect("could not read path");
}
