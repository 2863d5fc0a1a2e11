pub mod dittoserver_types;
