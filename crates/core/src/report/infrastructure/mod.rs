pub mod csv_report_writer;
pub mod glyph_timestamp_decoder;
