pub mod execution_provider;
pub mod inception_preprocessor;
pub mod model_files;
pub mod onnx_frame_classifier;
