pub mod enfuser;
